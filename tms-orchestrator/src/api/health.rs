//! System Health API Handlers
//!
//! Aggregate queue/runner/resource health. Overall status degrades when the
//! average queue wait exceeds its threshold or the runner fleet's health
//! ratio drops below 80%, and goes unhealthy below 50%.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::repository::{execution_repository, runner_repository};
use crate::service::resource_service;
use crate::service::resources::SystemResourceSummary;
use crate::state::AppState;

/// GET /health
/// Bare liveness probe.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
    pub status: OverallStatus,
    pub queue: QueueHealth,
    pub runners: RunnerHealth,
    pub resources: SystemResourceSummary,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub queued_executions: i64,
    pub average_wait_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct RunnerHealth {
    pub active_runners: i64,
    pub healthy_runners: i64,
}

/// GET /system/health
pub async fn system_health(State(state): State<AppState>) -> ApiResult<Json<SystemHealth>> {
    let queued = execution_repository::count_queued(&state.pool).await?;
    let average_wait = execution_repository::average_queue_wait_seconds(&state.pool).await?;
    let (active, healthy) = runner_repository::health_tally(&state.pool).await?;
    let resources = resource_service::system_resource_summary(&state).await?;

    let status = classify(
        active,
        healthy,
        average_wait,
        state.config.queue_wait_degraded.as_secs_f64(),
    );

    Ok(Json(SystemHealth {
        status,
        queue: QueueHealth {
            queued_executions: queued,
            average_wait_seconds: average_wait,
        },
        runners: RunnerHealth {
            active_runners: active,
            healthy_runners: healthy,
        },
        resources,
    }))
}

/// Overall classification. The health ratio counts active runners that the
/// monitor has not demoted; a fleet with no active runners is degraded, not
/// unhealthy: nothing is failing, but nothing can run either.
fn classify(
    active_runners: i64,
    healthy_runners: i64,
    average_wait_seconds: f64,
    degraded_wait_seconds: f64,
) -> OverallStatus {
    if active_runners == 0 {
        return OverallStatus::Degraded;
    }

    let ratio = healthy_runners as f64 / active_runners as f64;

    if ratio < 0.5 {
        return OverallStatus::Unhealthy;
    }

    if ratio < 0.8 || average_wait_seconds > degraded_wait_seconds {
        return OverallStatus::Degraded;
    }

    OverallStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_fleet() {
        assert_eq!(classify(10, 10, 5.0, 300.0), OverallStatus::Healthy);
        assert_eq!(classify(10, 8, 5.0, 300.0), OverallStatus::Healthy);
    }

    #[test]
    fn test_degraded_on_health_ratio() {
        assert_eq!(classify(10, 7, 5.0, 300.0), OverallStatus::Degraded);
        assert_eq!(classify(10, 5, 5.0, 300.0), OverallStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_below_half() {
        assert_eq!(classify(10, 4, 5.0, 300.0), OverallStatus::Unhealthy);
        assert_eq!(classify(2, 0, 5.0, 300.0), OverallStatus::Unhealthy);
    }

    #[test]
    fn test_degraded_on_queue_wait() {
        assert_eq!(classify(10, 10, 301.0, 300.0), OverallStatus::Degraded);
    }

    #[test]
    fn test_empty_fleet_is_degraded() {
        assert_eq!(classify(0, 0, 0.0, 300.0), OverallStatus::Degraded);
    }
}
