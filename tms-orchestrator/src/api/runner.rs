//! Runner API Handlers
//!
//! HTTP endpoints for runner registration and administrative updates.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use tms_core::domain::runner::TestRunner;
use tms_core::dto::runner::{RegisterRunner, RunnerPatch, RunnerRegistered};

use crate::api::error::ApiResult;
use crate::service::registry_service;
use crate::state::AppState;

/// POST /runners/register
pub async fn register_runner(
    State(state): State<AppState>,
    Json(req): Json<RegisterRunner>,
) -> ApiResult<(StatusCode, Json<RunnerRegistered>)> {
    tracing::info!(name = %req.name, runner_type = %req.runner_type, "Registering runner");

    let runner = registry_service::register(&state, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(RunnerRegistered {
            runner_id: runner.id,
        }),
    ))
}

/// PUT /runners/{id}
/// Partial update restricted to the allow-list in `RunnerPatch`.
pub async fn update_runner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<RunnerPatch>,
) -> ApiResult<Json<TestRunner>> {
    tracing::info!(runner_id = %id, "Updating runner");

    let runner = registry_service::update(&state, id, patch).await?;

    Ok(Json(runner))
}

/// GET /runners
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<TestRunner>>> {
    tracing::debug!("Listing runners");

    let runners = registry_service::list_runners(&state).await?;

    Ok(Json(runners))
}

/// GET /runners/{id}
pub async fn get_runner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TestRunner>> {
    tracing::debug!(runner_id = %id, "Getting runner");

    let runner = registry_service::get_runner(&state, id).await?;

    Ok(Json(runner))
}
