//! Runner Registry
//!
//! Registration and administrative updates for runners. Mutation through
//! the API is limited to the typed allow-list in [`RunnerPatch`]; slot
//! counters and health fields are owned by the orchestrator. Runners are
//! never hard-deleted while referenced; operators soft-disable via status.

use uuid::Uuid;

use tms_core::domain::runner::{HealthStatus, RunnerStatus, TestRunner};
use tms_core::dto::runner::{RegisterRunner, RunnerPatch};

use crate::repository::runner_repository;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("runner {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Register a new runner.
pub async fn register(state: &AppState, req: RegisterRunner) -> Result<TestRunner, RegistryError> {
    validate_register_request(&req)?;

    let runner = TestRunner {
        id: Uuid::new_v4(),
        name: req.name,
        runner_type: req.runner_type,
        endpoint_url: req.endpoint_url,
        webhook_url: req.webhook_url,
        health_check_url: req.health_check_url,
        capabilities: req.capabilities,
        max_concurrent_jobs: req.max_concurrent_jobs.unwrap_or(1),
        current_jobs: 0,
        priority: req.priority.unwrap_or(50),
        status: RunnerStatus::Active,
        health_status: HealthStatus::Unknown,
        consecutive_health_failures: 0,
        last_health_check: None,
        registered_at: chrono::Utc::now(),
    };

    runner_repository::create(&state.pool, &runner).await?;

    tracing::info!(
        runner_id = %runner.id,
        name = %runner.name,
        runner_type = %runner.runner_type,
        "Runner registered"
    );

    Ok(runner)
}

/// Apply an allow-list patch to a runner and return the updated record.
pub async fn update(
    state: &AppState,
    id: Uuid,
    patch: RunnerPatch,
) -> Result<TestRunner, RegistryError> {
    validate_patch(&patch)?;

    let updated = runner_repository::apply_patch(&state.pool, id, &patch).await?;
    if !updated {
        return Err(RegistryError::NotFound(id));
    }

    tracing::info!(runner_id = %id, "Runner updated");

    runner_repository::find_by_id(&state.pool, id)
        .await?
        .ok_or(RegistryError::NotFound(id))
}

/// Get a runner by ID
pub async fn get_runner(state: &AppState, id: Uuid) -> Result<TestRunner, RegistryError> {
    runner_repository::find_by_id(&state.pool, id)
        .await?
        .ok_or(RegistryError::NotFound(id))
}

/// List all runners
pub async fn list_runners(state: &AppState) -> Result<Vec<TestRunner>, RegistryError> {
    let runners = runner_repository::list_all(&state.pool).await?;
    Ok(runners)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_register_request(req: &RegisterRunner) -> Result<(), RegistryError> {
    if req.name.trim().is_empty() {
        return Err(RegistryError::Validation("name is required".to_string()));
    }

    if req.runner_type.trim().is_empty() {
        return Err(RegistryError::Validation(
            "runner_type is required".to_string(),
        ));
    }

    if req.endpoint_url.trim().is_empty() {
        return Err(RegistryError::Validation(
            "endpoint_url is required".to_string(),
        ));
    }

    if let Some(max) = req.max_concurrent_jobs {
        if max < 1 {
            return Err(RegistryError::Validation(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_patch(patch: &RunnerPatch) -> Result<(), RegistryError> {
    if let Some(max) = patch.max_concurrent_jobs {
        if max < 1 {
            return Err(RegistryError::Validation(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
    }

    if let Some(url) = &patch.endpoint_url {
        if url.trim().is_empty() {
            return Err(RegistryError::Validation(
                "endpoint_url cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::domain::runner::RunnerCapabilities;

    fn request() -> RegisterRunner {
        RegisterRunner {
            name: "runner-eu-1".to_string(),
            runner_type: "playwright".to_string(),
            endpoint_url: "http://runner:9000".to_string(),
            webhook_url: None,
            health_check_url: None,
            capabilities: RunnerCapabilities::default(),
            max_concurrent_jobs: None,
            priority: None,
        }
    }

    #[test]
    fn test_validate_register_request() {
        assert!(validate_register_request(&request()).is_ok());

        let mut unnamed = request();
        unnamed.name = "  ".to_string();
        assert!(validate_register_request(&unnamed).is_err());

        let mut untyped = request();
        untyped.runner_type = String::new();
        assert!(validate_register_request(&untyped).is_err());

        let mut zero_slots = request();
        zero_slots.max_concurrent_jobs = Some(0);
        assert!(validate_register_request(&zero_slots).is_err());
    }

    #[test]
    fn test_validate_patch() {
        assert!(validate_patch(&RunnerPatch::default()).is_ok());

        let bad = RunnerPatch {
            max_concurrent_jobs: Some(0),
            ..Default::default()
        };
        assert!(validate_patch(&bad).is_err());
    }
}
