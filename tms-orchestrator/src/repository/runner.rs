//! Runner Repository
//!
//! Handles all database operations related to runners, including the
//! compare-and-increment slot reservation that keeps two concurrent
//! assignments from overshooting `max_concurrent_jobs`.

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::runner::{HealthStatus, RunnerCapabilities, RunnerStatus, TestRunner};
use tms_core::dto::runner::RunnerPatch;

/// Insert a newly registered runner.
pub async fn create(pool: &PgPool, runner: &TestRunner) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runners (
            id, name, runner_type, endpoint_url, webhook_url, health_check_url,
            capabilities, max_concurrent_jobs, current_jobs, priority,
            status, health_status, consecutive_health_failures, registered_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(runner.id)
    .bind(&runner.name)
    .bind(&runner.runner_type)
    .bind(&runner.endpoint_url)
    .bind(&runner.webhook_url)
    .bind(&runner.health_check_url)
    .bind(serde_json::to_value(&runner.capabilities).unwrap_or_default())
    .bind(runner.max_concurrent_jobs)
    .bind(runner.current_jobs)
    .bind(runner.priority)
    .bind(status_to_string(runner.status))
    .bind(health_to_string(runner.health_status))
    .bind(runner.consecutive_health_failures)
    .bind(runner.registered_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a runner by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<TestRunner>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, name, runner_type, endpoint_url, webhook_url, health_check_url,
               capabilities, max_concurrent_jobs, current_jobs, priority,
               status, health_status, consecutive_health_failures,
               last_health_check, registered_at
        FROM runners
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all runners
pub async fn list_all(pool: &PgPool) -> Result<Vec<TestRunner>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, name, runner_type, endpoint_url, webhook_url, health_check_url,
               capabilities, max_concurrent_jobs, current_jobs, priority,
               status, health_status, consecutive_health_failures,
               last_health_check, registered_at
        FROM runners
        ORDER BY registered_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List runners the assignment engine may consider: administratively active,
/// not demoted by the health monitor, with at least one free slot. Ordered
/// by id for deterministic selection.
pub async fn list_assignable(pool: &PgPool) -> Result<Vec<TestRunner>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, name, runner_type, endpoint_url, webhook_url, health_check_url,
               capabilities, max_concurrent_jobs, current_jobs, priority,
               status, health_status, consecutive_health_failures,
               last_health_check, registered_at
        FROM runners
        WHERE status = 'active' AND health_status <> 'unhealthy'
              AND current_jobs < max_concurrent_jobs
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List active runners that expose a health-check URL, for the monitor.
pub async fn list_probeable(pool: &PgPool) -> Result<Vec<TestRunner>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, name, runner_type, endpoint_url, webhook_url, health_check_url,
               capabilities, max_concurrent_jobs, current_jobs, priority,
               status, health_status, consecutive_health_failures,
               last_health_check, registered_at
        FROM runners
        WHERE status = 'active' AND health_check_url IS NOT NULL
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Apply an allow-list patch. Only the fields present in [`RunnerPatch`] are
/// mutable through the API; everything else (current_jobs, health fields) is
/// owned by the orchestrator. Returns false for an unknown runner.
pub async fn apply_patch(pool: &PgPool, id: Uuid, patch: &RunnerPatch) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE runners
        SET status = COALESCE($2, status),
            priority = COALESCE($3, priority),
            capabilities = COALESCE($4, capabilities),
            max_concurrent_jobs = COALESCE($5, max_concurrent_jobs),
            endpoint_url = COALESCE($6, endpoint_url),
            webhook_url = COALESCE($7, webhook_url),
            health_check_url = COALESCE($8, health_check_url)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(patch.status.map(status_to_string))
    .bind(patch.priority)
    .bind(
        patch
            .capabilities
            .as_ref()
            .map(|c| serde_json::to_value(c).unwrap_or_default()),
    )
    .bind(patch.max_concurrent_jobs)
    .bind(&patch.endpoint_url)
    .bind(&patch.webhook_url)
    .bind(&patch.health_check_url)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a successful probe: healthy, failure streak reset.
pub async fn mark_healthy(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE runners
        SET health_status = 'healthy', consecutive_health_failures = 0,
            last_health_check = $1
        WHERE id = $2
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a failed probe and return the new failure streak. The caller
/// demotes once the streak reaches the configured threshold.
pub async fn record_probe_failure(pool: &PgPool, id: Uuid) -> Result<i32, sqlx::Error> {
    let row: (i32,) = sqlx::query_as(
        r#"
        UPDATE runners
        SET consecutive_health_failures = consecutive_health_failures + 1,
            last_health_check = $1
        WHERE id = $2
        RETURNING consecutive_health_failures
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Demote a runner out of assignment eligibility.
pub async fn mark_unhealthy(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE runners
        SET health_status = 'unhealthy', last_health_check = $1
        WHERE id = $2
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-fleet health tally: (active runners, active runners not demoted).
pub async fn health_tally(pool: &PgPool) -> Result<(i64, i64), sqlx::Error> {
    let row: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE health_status <> 'unhealthy')
        FROM runners
        WHERE status = 'active'
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

// =============================================================================
// Helper Functions
// =============================================================================

pub(crate) fn status_to_string(status: RunnerStatus) -> &'static str {
    match status {
        RunnerStatus::Active => "active",
        RunnerStatus::Inactive => "inactive",
        RunnerStatus::Maintenance => "maintenance",
        RunnerStatus::Error => "error",
    }
}

fn string_to_status(s: &str) -> RunnerStatus {
    match s {
        "active" => RunnerStatus::Active,
        "inactive" => RunnerStatus::Inactive,
        "maintenance" => RunnerStatus::Maintenance,
        "error" => RunnerStatus::Error,
        _ => RunnerStatus::Inactive,
    }
}

fn health_to_string(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Unknown => "unknown",
    }
}

fn string_to_health(s: &str) -> HealthStatus {
    match s {
        "healthy" => HealthStatus::Healthy,
        "unhealthy" => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: Uuid,
    name: String,
    runner_type: String,
    endpoint_url: String,
    webhook_url: Option<String>,
    health_check_url: Option<String>,
    capabilities: serde_json::Value,
    max_concurrent_jobs: i32,
    current_jobs: i32,
    priority: i32,
    status: String,
    health_status: String,
    consecutive_health_failures: i32,
    last_health_check: Option<chrono::DateTime<chrono::Utc>>,
    registered_at: chrono::DateTime<chrono::Utc>,
}

impl From<RunnerRow> for TestRunner {
    fn from(row: RunnerRow) -> Self {
        let capabilities: RunnerCapabilities =
            serde_json::from_value(row.capabilities).unwrap_or_default();

        TestRunner {
            id: row.id,
            name: row.name,
            runner_type: row.runner_type,
            endpoint_url: row.endpoint_url,
            webhook_url: row.webhook_url,
            health_check_url: row.health_check_url,
            capabilities,
            max_concurrent_jobs: row.max_concurrent_jobs,
            current_jobs: row.current_jobs,
            priority: row.priority,
            status: string_to_status(&row.status),
            health_status: string_to_health(&row.health_status),
            consecutive_health_failures: row.consecutive_health_failures,
            last_health_check: row.last_health_check,
            registered_at: row.registered_at,
        }
    }
}
