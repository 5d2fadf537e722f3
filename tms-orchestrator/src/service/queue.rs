//! Execution Queue Manager
//!
//! Owns the lifecycle of execution requests: validated submission, status
//! queries, cancellation, retry lineage and the timeout sweep's force-fail.
//! Transitions out of `running` belong to the webhook ingestor; the
//! assignment engine owns queued → assigned.

use uuid::Uuid;

use tms_core::domain::event::ExecutionEvent;
use tms_core::domain::execution::{ExecutionRequest, ExecutionStatus};
use tms_core::dto::execution::SubmitExecution;

use crate::repository::{execution_repository, shard_repository};
use crate::service::assignment::AssignmentError;
use crate::service::parallel;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}

/// Validate and enqueue a submission. Parallel submissions
/// (`parallel_shards > 1`) are delegated to the coordinator; everything else
/// is queued and immediately offered to the assignment engine.
pub async fn submit(state: &AppState, req: SubmitExecution) -> Result<ExecutionRequest, QueueError> {
    validate_submission(&req)?;

    let execution = build_execution(state, &req);

    if execution.is_parallel_parent() {
        return parallel::orchestrate(state, execution).await;
    }

    enqueue(state, execution).await
}

/// Insert a fresh execution row, emit `Queued` and try one immediate
/// assignment. Shared by submission and retry.
pub(crate) async fn enqueue(
    state: &AppState,
    execution: ExecutionRequest,
) -> Result<ExecutionRequest, QueueError> {
    execution_repository::create(&state.pool, &execution)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                QueueError::Validation(format!("execution_id {} already exists", execution.id))
            } else {
                QueueError::Database(e)
            }
        })?;

    tracing::info!(
        execution_id = %execution.id,
        test_suite = %execution.test_suite,
        environment = %execution.environment,
        "Execution queued"
    );

    state.events.publish(ExecutionEvent::Queued {
        execution_id: execution.id,
        test_suite: execution.test_suite.clone(),
        environment: execution.environment.clone(),
    });

    state.assignment.assign_execution(state, &execution).await?;

    // Re-read so the caller sees the post-assignment state
    execution_repository::find_by_id(&state.pool, execution.id)
        .await?
        .ok_or(QueueError::NotFound(execution.id))
}

/// Get an execution by ID
pub async fn get_execution(state: &AppState, id: Uuid) -> Result<ExecutionRequest, QueueError> {
    execution_repository::find_by_id(&state.pool, id)
        .await?
        .ok_or(QueueError::NotFound(id))
}

/// Cancel an execution. Only queued/assigned/running executions can be
/// cancelled; cancellation is cooperative, so work already dispatched to a
/// runner is not retracted, and its late webhook will be discarded as a
/// no-op against the terminal state.
pub async fn cancel(state: &AppState, id: Uuid) -> Result<(), QueueError> {
    let execution = get_execution(state, id).await?;

    if execution.status.is_terminal() {
        return Err(QueueError::InvalidState(format!(
            "cannot cancel execution {} in state {}",
            id, execution.status
        )));
    }

    // Parallel parents cancel their outstanding shards first so every shard
    // allocation and runner slot is returned.
    if execution.is_parallel_parent() {
        let shards = shard_repository::find_by_parent(&state.pool, id).await?;
        for shard in shards.iter().filter(|s| !s.status.is_terminal()) {
            shard_repository::finalize(
                &state.pool,
                id,
                shard.shard_index,
                ExecutionStatus::Cancelled,
                None,
                None,
            )
            .await?;
        }
    }

    let cancelled =
        execution_repository::finalize(&state.pool, id, ExecutionStatus::Cancelled, None, None)
            .await?;

    if !cancelled {
        // Lost a race against a webhook or the sweep
        return Err(QueueError::InvalidState(format!(
            "execution {} reached a terminal state concurrently",
            id
        )));
    }

    tracing::info!(execution_id = %id, "Execution cancelled");
    state
        .events
        .publish(ExecutionEvent::Cancelled { execution_id: id });

    Ok(())
}

/// Create a new execution that re-runs a terminal one, with first-class
/// lineage: `retry_of` points at the original and `retry_count` increments.
pub async fn retry(state: &AppState, id: Uuid) -> Result<ExecutionRequest, QueueError> {
    let original = get_execution(state, id).await?;

    if !original.status.is_terminal() {
        return Err(QueueError::InvalidState(format!(
            "cannot retry execution {} in non-terminal state {}",
            id, original.status
        )));
    }

    let now = chrono::Utc::now();
    let timeout = original
        .timeout_at
        .and_then(|deadline| (deadline - original.created_at).to_std().ok())
        .unwrap_or(state.config.default_execution_timeout);

    let replacement = ExecutionRequest {
        id: Uuid::new_v4(),
        test_suite: original.test_suite.clone(),
        environment: original.environment.clone(),
        priority: original.priority,
        status: ExecutionStatus::Queued,
        requested_runner_type: original.requested_runner_type.clone(),
        requested_runner_id: original.requested_runner_id,
        assigned_runner_id: None,
        estimated_duration_seconds: original.estimated_duration_seconds,
        timeout_at: Some(
            now + chrono::Duration::from_std(timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600)),
        ),
        retry_count: original.retry_count + 1,
        retry_of: Some(original.id),
        total_shards: original.total_shards,
        created_at: now,
        assigned_at: None,
        started_at: None,
        completed_at: None,
        results: None,
        error_message: None,
        metadata: original.metadata.clone(),
    };

    tracing::info!(
        execution_id = %replacement.id,
        retry_of = %original.id,
        retry_count = replacement.retry_count,
        "Retrying execution"
    );

    if replacement.is_parallel_parent() {
        parallel::orchestrate(state, replacement).await
    } else {
        enqueue(state, replacement).await
    }
}

/// Force-fail running executions whose deadline elapsed. Called only by the
/// timeout sweep, the single component allowed to end an execution without
/// a webhook.
pub async fn fail_timed_out(state: &AppState) -> Result<u64, QueueError> {
    let overdue = execution_repository::find_timed_out(&state.pool).await?;
    let mut failed = 0;

    for id in overdue {
        let finalized = execution_repository::finalize(
            &state.pool,
            id,
            ExecutionStatus::Failed,
            None,
            Some("execution timed out"),
        )
        .await?;

        if finalized {
            failed += 1;
            tracing::warn!(execution_id = %id, "Execution timed out");
            state.events.publish(ExecutionEvent::Failed {
                execution_id: id,
                shard_index: None,
                error_message: Some("execution timed out".to_string()),
            });
        }
    }

    Ok(failed)
}

// =============================================================================
// Validation & Construction
// =============================================================================

fn validate_submission(req: &SubmitExecution) -> Result<(), QueueError> {
    if req.test_suite.trim().is_empty() {
        return Err(QueueError::Validation(
            "test_suite is required".to_string(),
        ));
    }

    if req.environment.trim().is_empty() {
        return Err(QueueError::Validation(
            "environment is required".to_string(),
        ));
    }

    if let Some(shards) = req.parallel_shards {
        if shards < 1 {
            return Err(QueueError::Validation(
                "parallel_shards must be at least 1".to_string(),
            ));
        }
    }

    if let Some(timeout) = req.timeout_seconds {
        if timeout < 1 {
            return Err(QueueError::Validation(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}

fn build_execution(state: &AppState, req: &SubmitExecution) -> ExecutionRequest {
    let now = chrono::Utc::now();
    let timeout = req
        .timeout_seconds
        .map(|s| chrono::Duration::seconds(s))
        .unwrap_or_else(|| {
            chrono::Duration::from_std(state.config.default_execution_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600))
        });

    // A single shard is just a regular execution
    let total_shards = req.parallel_shards.filter(|n| *n > 1);

    ExecutionRequest {
        id: req.execution_id.unwrap_or_else(Uuid::new_v4),
        test_suite: req.test_suite.clone(),
        environment: req.environment.clone(),
        priority: req.priority,
        status: ExecutionStatus::Queued,
        requested_runner_type: req.requested_runner_type.clone(),
        requested_runner_id: req.requested_runner_id,
        assigned_runner_id: None,
        estimated_duration_seconds: req.estimated_duration_seconds,
        timeout_at: Some(now + timeout),
        retry_count: 0,
        retry_of: None,
        total_shards,
        created_at: now,
        assigned_at: None,
        started_at: None,
        completed_at: None,
        results: None,
        error_message: None,
        metadata: req.metadata.clone(),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn submission() -> SubmitExecution {
        SubmitExecution {
            execution_id: None,
            test_suite: "smoke".to_string(),
            environment: "staging".to_string(),
            priority: 80,
            requested_runner_type: None,
            requested_runner_id: None,
            parallel_shards: None,
            estimated_duration_seconds: None,
            timeout_seconds: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_validate_accepts_complete_submission() {
        assert!(validate_submission(&submission()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut missing_suite = submission();
        missing_suite.test_suite = "  ".to_string();
        assert!(validate_submission(&missing_suite).is_err());

        let mut missing_env = submission();
        missing_env.environment = String::new();
        assert!(validate_submission(&missing_env).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_shard_count() {
        let mut bad = submission();
        bad.parallel_shards = Some(0);
        assert!(validate_submission(&bad).is_err());

        let mut one = submission();
        one.parallel_shards = Some(1);
        assert!(validate_submission(&one).is_ok());
    }
}
