//! Parallel Execution Coordinator
//!
//! Splits one logical execution into N shards, each independently assigned
//! like a regular execution, and folds shard outcomes back into the parent.
//! The parent is complete only when every shard is terminal; shard failures
//! are reported in the aggregate, not escalated; the caller judges.

use uuid::Uuid;

use tms_core::domain::event::ExecutionEvent;
use tms_core::domain::execution::{ExecutionRequest, ExecutionResults, ExecutionStatus};
use tms_core::domain::metric::{ExecutionMetric, MetricType};
use tms_core::domain::shard::{ParallelExecutionShard, ShardRollup};
use tms_core::dto::execution::ParallelStatusView;
use tms_core::dto::webhook::ShardResultPayload;

use crate::repository::{execution_repository, metric_repository, shard_repository};
use crate::service::assignment::{AssignmentSpec, ShardAssignment, allocation_request};
use crate::service::queue::QueueError;
use crate::service::webhook::{TransitionPlan, WebhookError, WebhookOutcome, plan_transition};
use crate::state::AppState;

/// Accept a parallel parent: persist it, create its shard batch atomically,
/// then offer every shard to the assignment engine. Shards that find no
/// runner stay queued for the dispatch tick.
pub async fn orchestrate(
    state: &AppState,
    execution: ExecutionRequest,
) -> Result<ExecutionRequest, QueueError> {
    let total_shards = execution
        .total_shards
        .ok_or_else(|| QueueError::Validation("parallel execution requires shards".to_string()))?;

    execution_repository::create(&state.pool, &execution)
        .await
        .map_err(|e| {
            if crate::service::queue::is_unique_violation(&e) {
                QueueError::Validation(format!("execution_id {} already exists", execution.id))
            } else {
                QueueError::Database(e)
            }
        })?;

    shard_repository::create_batch(&state.pool, execution.id, total_shards).await?;

    tracing::info!(
        execution_id = %execution.id,
        total_shards,
        "Parallel execution queued"
    );

    state.events.publish(ExecutionEvent::Queued {
        execution_id: execution.id,
        test_suite: execution.test_suite.clone(),
        environment: execution.environment.clone(),
    });

    let (cpu, memory_mb) = allocation_request(&execution.metadata);
    let spec = AssignmentSpec::from_execution(&execution);

    for shard_index in 0..total_shards {
        let shard = ShardAssignment {
            parent_execution_id: execution.id,
            shard_index,
            spec: spec.clone(),
            cpu_allocation: cpu,
            memory_allocation_mb: memory_mb,
        };

        if state.assignment.assign_shard(state, &shard).await?.is_none() {
            tracing::debug!(
                execution_id = %execution.id,
                shard_index,
                "No eligible runner for shard, left queued"
            );
        }
    }

    execution_repository::find_by_id(&state.pool, execution.id)
        .await?
        .ok_or(QueueError::NotFound(execution.id))
}

/// Apply a shard-scoped runner callback, then check whether the parent's
/// aggregate is now complete.
pub async fn handle_shard_webhook(
    state: &AppState,
    parent_execution_id: Uuid,
    payload: ShardResultPayload,
) -> Result<WebhookOutcome, WebhookError> {
    let parent = execution_repository::find_by_id(&state.pool, parent_execution_id)
        .await?
        .ok_or(WebhookError::NotFound(parent_execution_id))?;

    if !parent.is_parallel_parent() {
        return Err(WebhookError::NotParallel(parent_execution_id));
    }

    let shard = shard_repository::find_one(&state.pool, parent_execution_id, payload.shard_index)
        .await?
        .ok_or(WebhookError::NotFound(parent_execution_id))?;

    match plan_transition(shard.status, payload.status) {
        TransitionPlan::Start => {
            if !shard_repository::mark_running(&state.pool, parent_execution_id, payload.shard_index)
                .await?
            {
                return Ok(WebhookOutcome::NoOp);
            }

            tracing::info!(
                execution_id = %parent_execution_id,
                shard_index = payload.shard_index,
                "Shard started"
            );
            state.events.publish(ExecutionEvent::Started {
                execution_id: parent_execution_id,
                shard_index: Some(payload.shard_index),
            });

            Ok(WebhookOutcome::Applied)
        }

        TransitionPlan::Finish(status) => {
            let finalized = shard_repository::finalize(
                &state.pool,
                parent_execution_id,
                payload.shard_index,
                status,
                payload.results.as_ref(),
                payload.error_message.as_deref(),
            )
            .await?;

            if !finalized {
                return Ok(WebhookOutcome::NoOp);
            }

            if let Some(results) = &payload.results {
                metric_repository::record(
                    &state.pool,
                    &ExecutionMetric {
                        execution_id: Some(parent_execution_id),
                        runner_id: shard.runner_id,
                        metric_type: MetricType::ExecutionTime,
                        metric_value: results.duration_seconds,
                        recorded_at: chrono::Utc::now(),
                    },
                )
                .await?;
            }

            tracing::info!(
                execution_id = %parent_execution_id,
                shard_index = payload.shard_index,
                status = %status,
                "Shard finished"
            );

            let event = match status {
                ExecutionStatus::Failed => ExecutionEvent::Failed {
                    execution_id: parent_execution_id,
                    shard_index: Some(payload.shard_index),
                    error_message: payload.error_message.clone(),
                },
                _ => ExecutionEvent::Completed {
                    execution_id: parent_execution_id,
                    shard_index: Some(payload.shard_index),
                    results: payload.results.clone(),
                },
            };
            state.events.publish(event);

            check_aggregate_completion(state, parent_execution_id).await?;

            Ok(WebhookOutcome::Applied)
        }

        TransitionPlan::Ignore(reason) => {
            tracing::info!(
                execution_id = %parent_execution_id,
                shard_index = payload.shard_index,
                current = %shard.status,
                reported = ?payload.status,
                reason = ?reason,
                "Shard webhook accepted with no state change"
            );
            Ok(WebhookOutcome::NoOp)
        }
    }
}

/// If every shard of a parent is terminal, roll the outcomes up and complete
/// the parent. Safe to call repeatedly; the parent's status guard makes the
/// aggregation idempotent.
pub async fn check_aggregate_completion(
    state: &AppState,
    parent_execution_id: Uuid,
) -> Result<(), WebhookError> {
    let parent = match execution_repository::find_by_id(&state.pool, parent_execution_id).await? {
        Some(parent) if !parent.status.is_terminal() => parent,
        _ => return Ok(()),
    };

    let total_shards = match parent.total_shards {
        Some(n) => n,
        None => return Ok(()),
    };

    let shards = shard_repository::find_by_parent(&state.pool, parent_execution_id).await?;
    let rollup = ShardRollup::from_shards(total_shards, &shards);

    if !rollup.all_terminal() {
        return Ok(());
    }

    let aggregate = aggregate_results(&shards);
    let error_message = if rollup.failed_shards > 0 {
        Some(format!(
            "{} of {} shards failed",
            rollup.failed_shards, rollup.total_shards
        ))
    } else {
        None
    };

    let finalized = execution_repository::finalize(
        &state.pool,
        parent_execution_id,
        ExecutionStatus::Completed,
        Some(&aggregate),
        error_message.as_deref(),
    )
    .await?;

    if finalized {
        tracing::info!(
            execution_id = %parent_execution_id,
            completed = rollup.completed_shards,
            failed = rollup.failed_shards,
            "Parallel execution complete"
        );
        state.events.publish(ExecutionEvent::Completed {
            execution_id: parent_execution_id,
            shard_index: None,
            results: Some(aggregate),
        });
    }

    Ok(())
}

/// Rollup view for `GET /executions/{id}/status` on a parallel parent.
pub async fn get_status(
    state: &AppState,
    parent: &ExecutionRequest,
) -> Result<ParallelStatusView, QueueError> {
    let total_shards = parent
        .total_shards
        .ok_or_else(|| QueueError::InvalidState(format!("{} is not parallel", parent.id)))?;

    let shards = shard_repository::find_by_parent(&state.pool, parent.id).await?;
    let rollup = ShardRollup::from_shards(total_shards, &shards);

    Ok(ParallelStatusView {
        execution_id: parent.id,
        status: parent.status,
        rollup,
        shards,
    })
}

/// Force-fail running shards whose parent deadline elapsed, then re-check
/// the affected parents' aggregates.
pub async fn fail_timed_out_shards(state: &AppState) -> Result<u64, WebhookError> {
    let overdue = shard_repository::find_timed_out(&state.pool).await?;
    let mut failed = 0;
    let mut parents: Vec<Uuid> = Vec::new();

    for (parent_id, shard_index) in overdue {
        let finalized = shard_repository::finalize(
            &state.pool,
            parent_id,
            shard_index,
            ExecutionStatus::Failed,
            None,
            Some("execution timed out"),
        )
        .await?;

        if finalized {
            failed += 1;
            tracing::warn!(
                execution_id = %parent_id,
                shard_index,
                "Shard timed out"
            );
            state.events.publish(ExecutionEvent::Failed {
                execution_id: parent_id,
                shard_index: Some(shard_index),
                error_message: Some("execution timed out".to_string()),
            });
            if !parents.contains(&parent_id) {
                parents.push(parent_id);
            }
        }
    }

    for parent_id in parents {
        check_aggregate_completion(state, parent_id).await?;
    }

    Ok(failed)
}

/// Sum shard result bundles into the parent's aggregate.
fn aggregate_results(shards: &[ParallelExecutionShard]) -> ExecutionResults {
    shards
        .iter()
        .filter_map(|s| s.results.as_ref())
        .fold(ExecutionResults::default(), |acc, r| acc.merge(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(
        index: i32,
        status: ExecutionStatus,
        results: Option<ExecutionResults>,
    ) -> ParallelExecutionShard {
        ParallelExecutionShard {
            parent_execution_id: Uuid::from_u128(1),
            shard_index: index,
            runner_id: None,
            status,
            started_at: None,
            completed_at: None,
            results,
            error_message: None,
        }
    }

    fn results(total: i32, passed: i32, failed: i32) -> ExecutionResults {
        ExecutionResults {
            total,
            passed,
            failed,
            skipped: 0,
            duration_seconds: 10.0,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_aggregate_sums_shard_results() {
        let shards = vec![
            shard(0, ExecutionStatus::Completed, Some(results(10, 10, 0))),
            shard(1, ExecutionStatus::Completed, Some(results(8, 7, 1))),
            shard(2, ExecutionStatus::Failed, None),
        ];

        let aggregate = aggregate_results(&shards);
        assert_eq!(aggregate.total, 18);
        assert_eq!(aggregate.passed, 17);
        assert_eq!(aggregate.failed, 1);
    }

    #[test]
    fn test_aggregate_of_resultless_shards_is_empty() {
        let shards = vec![
            shard(0, ExecutionStatus::Failed, None),
            shard(1, ExecutionStatus::Cancelled, None),
        ];

        let aggregate = aggregate_results(&shards);
        assert_eq!(aggregate.total, 0);
        assert_eq!(aggregate.passed, 0);
    }
}
