//! Execution API Handlers
//!
//! HTTP endpoints for submitting, querying, cancelling and retrying
//! executions.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use tms_core::domain::metric::ExecutionMetric;
use tms_core::dto::execution::{
    ExecutionStatusView, RetryAccepted, SubmitAccepted, SubmitExecution,
};

use crate::api::error::ApiResult;
use crate::repository::metric_repository;
use crate::service::{parallel_service, queue_service};
use crate::state::AppState;

/// POST /executions
/// Submit a new execution; `parallel_shards > 1` fans out across shards.
pub async fn submit_execution(
    State(state): State<AppState>,
    Json(req): Json<SubmitExecution>,
) -> ApiResult<(StatusCode, Json<SubmitAccepted>)> {
    tracing::info!(
        test_suite = %req.test_suite,
        environment = %req.environment,
        "Submitting execution"
    );

    let execution = queue_service::submit(&state, req).await?;

    let response = SubmitAccepted {
        execution_id: execution.id,
        status: execution.status,
        total_shards: execution.total_shards,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /executions/{id}/status
/// Regular executions return the full record; parallel parents return the
/// shard rollup.
pub async fn get_execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionStatusView>> {
    tracing::debug!(execution_id = %id, "Getting execution status");

    let execution = queue_service::get_execution(&state, id).await?;

    let view = if execution.is_parallel_parent() {
        ExecutionStatusView::Parallel(parallel_service::get_status(&state, &execution).await?)
    } else {
        ExecutionStatusView::Single(execution)
    };

    Ok(Json(view))
}

/// POST /executions/{id}/cancel
/// 404 for unknown executions, 400 when already terminal.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!(execution_id = %id, "Cancelling execution");

    queue_service::cancel(&state, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /executions/{id}/metrics
/// Time-series samples recorded for one execution.
pub async fn get_execution_metrics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExecutionMetric>>> {
    tracing::debug!(execution_id = %id, "Getting execution metrics");

    // Verify the execution exists first
    queue_service::get_execution(&state, id).await?;

    let metrics = metric_repository::find_by_execution(&state.pool, id).await?;

    Ok(Json(metrics))
}

/// POST /executions/{id}/retry
/// Creates a new execution re-running a terminal one, with lineage.
pub async fn retry_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<RetryAccepted>)> {
    tracing::info!(execution_id = %id, "Retrying execution");

    let replacement = queue_service::retry(&state, id).await?;

    let response = RetryAccepted {
        execution_id: replacement.id,
        retry_of: id,
        status: replacement.status,
    };

    Ok((StatusCode::CREATED, Json(response)))
}
