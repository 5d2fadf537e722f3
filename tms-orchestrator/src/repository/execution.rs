//! Execution Repository
//!
//! Handles all database operations related to execution requests. Lifecycle
//! transitions are expressed as conditional UPDATEs guarded on the current
//! status, so every transition has exactly one winner under concurrency.

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::execution::{ExecutionRequest, ExecutionResults, ExecutionStatus};

/// Insert a new execution row.
pub async fn create(pool: &PgPool, execution: &ExecutionRequest) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO executions (
            id, test_suite, environment, priority, status,
            requested_runner_type, requested_runner_id, estimated_duration_seconds,
            timeout_at, retry_count, retry_of, total_shards, created_at, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(execution.id)
    .bind(&execution.test_suite)
    .bind(&execution.environment)
    .bind(execution.priority)
    .bind(status_to_string(execution.status))
    .bind(&execution.requested_runner_type)
    .bind(execution.requested_runner_id)
    .bind(execution.estimated_duration_seconds)
    .bind(execution.timeout_at)
    .bind(execution.retry_count)
    .bind(execution.retry_of)
    .bind(execution.total_shards)
    .bind(execution.created_at)
    .bind(serde_json::to_value(&execution.metadata).unwrap_or_default())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find an execution by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ExecutionRequest>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, test_suite, environment, priority, status,
               requested_runner_type, requested_runner_id, assigned_runner_id,
               estimated_duration_seconds, timeout_at, retry_count, retry_of,
               total_shards, created_at, assigned_at, started_at, completed_at,
               results, error_message, metadata
        FROM executions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List queued, directly assignable executions (parallel parents excluded),
/// highest priority first, oldest first within a priority.
pub async fn find_queued(pool: &PgPool, limit: i64) -> Result<Vec<ExecutionRequest>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT id, test_suite, environment, priority, status,
               requested_runner_type, requested_runner_id, assigned_runner_id,
               estimated_duration_seconds, timeout_at, retry_count, retry_of,
               total_shards, created_at, assigned_at, started_at, completed_at,
               results, error_message, metadata
        FROM executions
        WHERE status = 'queued' AND total_shards IS NULL
        ORDER BY priority DESC, created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Bind a queued execution to a runner: reserve one slot on the runner with
/// a compare-and-increment, flip the execution to assigned and insert the
/// resource allocation, all in one transaction. Returns false (nothing
/// changed) when the runner lost its last slot or the execution left
/// `queued` in the meantime.
pub async fn commit_assignment(
    pool: &PgPool,
    id: Uuid,
    runner_id: Uuid,
    cpu_allocation: f64,
    memory_allocation_mb: i64,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now();

    let reserved = sqlx::query(
        r#"
        UPDATE runners
        SET current_jobs = current_jobs + 1
        WHERE id = $1 AND status = 'active' AND health_status <> 'unhealthy'
              AND current_jobs < max_concurrent_jobs
        "#,
    )
    .bind(runner_id)
    .execute(&mut *tx)
    .await?;

    if reserved.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let assigned = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'assigned', assigned_runner_id = $1, assigned_at = $2
        WHERE id = $3 AND status = 'queued'
        "#,
    )
    .bind(runner_id)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if assigned.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO resource_allocations (
            id, runner_id, execution_id, shard_index,
            cpu_allocation, memory_allocation_mb, status, created_at
        )
        VALUES ($1, $2, $3, NULL, $4, $5, 'allocated', $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(runner_id)
    .bind(id)
    .bind(cpu_allocation)
    .bind(memory_allocation_mb)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Transition assigned → running, recording `started_at`. Returns false if
/// the execution was not in `assigned` (late, duplicate or misdirected
/// progress webhook).
pub async fn mark_running(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'running', started_at = $1
        WHERE id = $2 AND status = 'assigned'
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Promote a parallel parent out of `queued` once its first shard is
/// dispatched. Parents skip `assigned`; runner bindings live on the shards.
pub async fn mark_parent_running(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'running', started_at = COALESCE(started_at, $1)
        WHERE id = $2 AND status = 'queued' AND total_shards IS NOT NULL
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Finalize an execution: flip to a terminal status, persist results,
/// release its resource allocation and free the runner slot, all in one
/// transaction. Returns false (and changes nothing) when the execution had
/// already reached a terminal state, which is what makes webhook redelivery
/// a no-op.
pub async fn finalize(
    pool: &PgPool,
    id: Uuid,
    status: ExecutionStatus,
    results: Option<&ExecutionResults>,
    error_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    debug_assert!(status.is_terminal());

    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now();

    let updated = sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, completed_at = $2, results = $3, error_message = $4
        WHERE id = $5 AND status IN ('queued', 'assigned', 'running')
        "#,
    )
    .bind(status_to_string(status))
    .bind(now)
    .bind(results.map(|r| serde_json::to_value(r).unwrap_or_default()))
    .bind(error_message)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let released = sqlx::query(
        r#"
        UPDATE resource_allocations
        SET status = 'released', released_at = $1
        WHERE execution_id = $2 AND shard_index IS NULL AND status <> 'released'
        RETURNING runner_id
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    use sqlx::Row;
    for row in &released {
        let runner_id: Uuid = row.get("runner_id");
        sqlx::query(
            "UPDATE runners SET current_jobs = GREATEST(current_jobs - 1, 0) WHERE id = $1",
        )
        .bind(runner_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Flip running executions whose deadline elapsed to failed, returning the
/// affected ids. The timeout sweep is the only caller; each id is then
/// finalized individually so allocations and slots are released under the
/// same guards as a webhook-driven failure.
pub async fn find_timed_out(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM executions
        WHERE status = 'running' AND timeout_at IS NOT NULL AND timeout_at < $1
              AND total_shards IS NULL
        "#,
    )
    .bind(chrono::Utc::now())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Average seconds spent in `queued` across the current queue. Zero when the
/// queue is empty.
pub async fn average_queue_wait_seconds(pool: &PgPool) -> Result<f64, sqlx::Error> {
    let row: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(EXTRACT(EPOCH FROM (NOW() - created_at)))::float8
        FROM executions
        WHERE status = 'queued'
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(0.0))
}

/// Count executions currently queued.
pub async fn count_queued(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM executions WHERE status = 'queued'")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

// =============================================================================
// Helper Functions
// =============================================================================

pub(crate) fn status_to_string(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Queued => "queued",
        ExecutionStatus::Assigned => "assigned",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

pub(crate) fn string_to_status(s: &str) -> ExecutionStatus {
    match s {
        "queued" => ExecutionStatus::Queued,
        "assigned" => ExecutionStatus::Assigned,
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Queued,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    test_suite: String,
    environment: String,
    priority: i32,
    status: String,
    requested_runner_type: Option<String>,
    requested_runner_id: Option<Uuid>,
    assigned_runner_id: Option<Uuid>,
    estimated_duration_seconds: Option<i64>,
    timeout_at: Option<chrono::DateTime<chrono::Utc>>,
    retry_count: i32,
    retry_of: Option<Uuid>,
    total_shards: Option<i32>,
    created_at: chrono::DateTime<chrono::Utc>,
    assigned_at: Option<chrono::DateTime<chrono::Utc>>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    results: Option<serde_json::Value>,
    error_message: Option<String>,
    metadata: serde_json::Value,
}

impl From<ExecutionRow> for ExecutionRequest {
    fn from(row: ExecutionRow) -> Self {
        let results = row
            .results
            .and_then(|v| serde_json::from_value(v).ok());

        let metadata = serde_json::from_value(row.metadata).unwrap_or_default();

        ExecutionRequest {
            id: row.id,
            test_suite: row.test_suite,
            environment: row.environment,
            priority: row.priority,
            status: string_to_status(&row.status),
            requested_runner_type: row.requested_runner_type,
            requested_runner_id: row.requested_runner_id,
            assigned_runner_id: row.assigned_runner_id,
            estimated_duration_seconds: row.estimated_duration_seconds,
            timeout_at: row.timeout_at,
            retry_count: row.retry_count,
            retry_of: row.retry_of,
            total_shards: row.total_shards,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            results,
            error_message: row.error_message,
            metadata,
        }
    }
}
