//! API Module
//!
//! HTTP API layer for the orchestrator. Each submodule handles endpoints for
//! a specific domain.

pub mod error;
pub mod execution;
pub mod health;
pub mod rule;
pub mod runner;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(health::health_check))
        // Execution endpoints
        .route("/executions", post(execution::submit_execution))
        .route(
            "/executions/{id}/status",
            get(execution::get_execution_status),
        )
        .route(
            "/executions/{id}/metrics",
            get(execution::get_execution_metrics),
        )
        .route("/executions/{id}/cancel", post(execution::cancel_execution))
        .route("/executions/{id}/retry", post(execution::retry_execution))
        // Runner endpoints
        .route("/runners/register", post(runner::register_runner))
        .route("/runners", get(runner::list_runners))
        .route("/runners/{id}", get(runner::get_runner))
        .route("/runners/{id}", put(runner::update_runner))
        // Load-balancing rules
        .route("/load-balancing-rules", post(rule::create_rule))
        .route("/load-balancing-rules", get(rule::list_rules))
        // Runner callbacks
        .route(
            "/webhooks/execution-results",
            post(webhook::execution_results),
        )
        .route(
            "/webhooks/parallel-execution/{parent_id}",
            post(webhook::parallel_execution_results),
        )
        // Aggregate system health
        .route("/system/health", get(health::system_health))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
