//! Webhook Result Ingestor
//!
//! The single asynchronous entry point by which runners report progress and
//! completion. This is the only writer that moves executions out of
//! `running` (the timeout sweep excepted). Redelivered webhooks for
//! already-terminal executions are accepted and discarded; that one rule
//! gives both idempotency and post-cancellation safety.

use uuid::Uuid;

use tms_core::domain::event::ExecutionEvent;
use tms_core::domain::execution::ExecutionStatus;
use tms_core::domain::metric::{ExecutionMetric, MetricType};
use tms_core::dto::webhook::{ExecutionResultPayload, ReportedStatus};

use crate::repository::{execution_repository, metric_repository};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("execution {0} is not a parallel parent")]
    NotParallel(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a delivery did to orchestration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Accepted but deliberately discarded (redelivery, post-cancel arrival
    /// or an out-of-order progress report)
    NoOp,
}

/// How a reported status maps onto the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    Start,
    Finish(ExecutionStatus),
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The execution already reached a terminal state; redeliveries and
    /// post-cancellation callbacks land here.
    AlreadyTerminal,
    /// A report for work the orchestrator never dispatched.
    NotDispatched,
    /// A duplicate progress report.
    AlreadyRunning,
}

/// Pure transition decision, shared by the execution and shard paths.
pub fn plan_transition(current: ExecutionStatus, reported: ReportedStatus) -> TransitionPlan {
    if current.is_terminal() {
        return TransitionPlan::Ignore(IgnoreReason::AlreadyTerminal);
    }

    match reported {
        ReportedStatus::Running => match current {
            ExecutionStatus::Assigned => TransitionPlan::Start,
            ExecutionStatus::Running => TransitionPlan::Ignore(IgnoreReason::AlreadyRunning),
            _ => TransitionPlan::Ignore(IgnoreReason::NotDispatched),
        },
        ReportedStatus::Completed => match current {
            ExecutionStatus::Assigned | ExecutionStatus::Running => {
                TransitionPlan::Finish(ExecutionStatus::Completed)
            }
            _ => TransitionPlan::Ignore(IgnoreReason::NotDispatched),
        },
        ReportedStatus::Failed => match current {
            ExecutionStatus::Assigned | ExecutionStatus::Running => {
                TransitionPlan::Finish(ExecutionStatus::Failed)
            }
            _ => TransitionPlan::Ignore(IgnoreReason::NotDispatched),
        },
    }
}

/// Ingest a result callback for a regular execution.
pub async fn ingest_execution_result(
    state: &AppState,
    payload: ExecutionResultPayload,
) -> Result<WebhookOutcome, WebhookError> {
    let execution = execution_repository::find_by_id(&state.pool, payload.execution_id)
        .await?
        .ok_or(WebhookError::NotFound(payload.execution_id))?;

    if execution.is_parallel_parent() {
        // Shard results belong on the parallel webhook; dropping this keeps
        // the parent's aggregate the single source of truth.
        tracing::warn!(
            execution_id = %execution.id,
            "Discarding direct webhook for parallel parent"
        );
        return Ok(WebhookOutcome::NoOp);
    }

    match plan_transition(execution.status, payload.status) {
        TransitionPlan::Start => {
            if !execution_repository::mark_running(&state.pool, execution.id).await? {
                return Ok(WebhookOutcome::NoOp);
            }

            let queue_wait = (chrono::Utc::now() - execution.created_at).num_seconds();
            metric_repository::record(
                &state.pool,
                &ExecutionMetric {
                    execution_id: Some(execution.id),
                    runner_id: execution.assigned_runner_id,
                    metric_type: MetricType::QueueWait,
                    metric_value: queue_wait as f64,
                    recorded_at: chrono::Utc::now(),
                },
            )
            .await?;

            tracing::info!(execution_id = %execution.id, "Execution started");
            state.events.publish(ExecutionEvent::Started {
                execution_id: execution.id,
                shard_index: None,
            });

            Ok(WebhookOutcome::Applied)
        }

        TransitionPlan::Finish(status) => {
            let finalized = execution_repository::finalize(
                &state.pool,
                execution.id,
                status,
                payload.results.as_ref(),
                payload.error_message.as_deref(),
            )
            .await?;

            if !finalized {
                // Raced with another delivery; exactly one wins
                return Ok(WebhookOutcome::NoOp);
            }

            if let Some(results) = &payload.results {
                metric_repository::record(
                    &state.pool,
                    &ExecutionMetric {
                        execution_id: Some(execution.id),
                        runner_id: execution.assigned_runner_id,
                        metric_type: MetricType::ExecutionTime,
                        metric_value: results.duration_seconds,
                        recorded_at: chrono::Utc::now(),
                    },
                )
                .await?;
            }

            tracing::info!(
                execution_id = %execution.id,
                status = %status,
                "Execution finished"
            );

            let event = match status {
                ExecutionStatus::Failed => ExecutionEvent::Failed {
                    execution_id: execution.id,
                    shard_index: None,
                    error_message: payload.error_message.clone(),
                },
                _ => ExecutionEvent::Completed {
                    execution_id: execution.id,
                    shard_index: None,
                    results: payload.results.clone(),
                },
            };
            state.events.publish(event);

            Ok(WebhookOutcome::Applied)
        }

        TransitionPlan::Ignore(reason) => {
            tracing::info!(
                execution_id = %execution.id,
                current = %execution.status,
                reported = ?payload.status,
                reason = ?reason,
                "Webhook accepted with no state change"
            );
            Ok(WebhookOutcome::NoOp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_report_starts_assigned_execution() {
        assert_eq!(
            plan_transition(ExecutionStatus::Assigned, ReportedStatus::Running),
            TransitionPlan::Start
        );
    }

    #[test]
    fn test_duplicate_running_report_is_ignored() {
        assert_eq!(
            plan_transition(ExecutionStatus::Running, ReportedStatus::Running),
            TransitionPlan::Ignore(IgnoreReason::AlreadyRunning)
        );
    }

    #[test]
    fn test_completion_from_running_and_assigned() {
        assert_eq!(
            plan_transition(ExecutionStatus::Running, ReportedStatus::Completed),
            TransitionPlan::Finish(ExecutionStatus::Completed)
        );
        // A fast runner may complete before sending a progress report
        assert_eq!(
            plan_transition(ExecutionStatus::Assigned, ReportedStatus::Failed),
            TransitionPlan::Finish(ExecutionStatus::Failed)
        );
    }

    #[test]
    fn test_terminal_states_absorb_redeliveries() {
        for terminal in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            for reported in [
                ReportedStatus::Running,
                ReportedStatus::Completed,
                ReportedStatus::Failed,
            ] {
                assert_eq!(
                    plan_transition(terminal, reported),
                    TransitionPlan::Ignore(IgnoreReason::AlreadyTerminal)
                );
            }
        }
    }

    #[test]
    fn test_reports_for_undispatched_work_are_ignored() {
        assert_eq!(
            plan_transition(ExecutionStatus::Queued, ReportedStatus::Completed),
            TransitionPlan::Ignore(IgnoreReason::NotDispatched)
        );
        assert_eq!(
            plan_transition(ExecutionStatus::Queued, ReportedStatus::Running),
            TransitionPlan::Ignore(IgnoreReason::NotDispatched)
        );
    }
}
