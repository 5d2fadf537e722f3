//! Shard Repository
//!
//! Handles database operations for parallel execution shards. Shard batches
//! are created inside one transaction: a parent with a partial shard set is
//! not a valid state.

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::execution::{ExecutionResults, ExecutionStatus};
use tms_core::domain::shard::ParallelExecutionShard;

use crate::repository::execution::{status_to_string, string_to_status};

/// Create `total_shards` queued shard rows with contiguous indices, all or
/// nothing.
pub async fn create_batch(
    pool: &PgPool,
    parent_execution_id: Uuid,
    total_shards: i32,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for shard_index in 0..total_shards {
        sqlx::query(
            r#"
            INSERT INTO parallel_execution_shards (parent_execution_id, shard_index, status)
            VALUES ($1, $2, 'queued')
            "#,
        )
        .bind(parent_execution_id)
        .bind(shard_index)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// List a parent's shards ordered by index.
pub async fn find_by_parent(
    pool: &PgPool,
    parent_execution_id: Uuid,
) -> Result<Vec<ParallelExecutionShard>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ShardRow>(
        r#"
        SELECT parent_execution_id, shard_index, runner_id, status,
               started_at, completed_at, results, error_message
        FROM parallel_execution_shards
        WHERE parent_execution_id = $1
        ORDER BY shard_index ASC
        "#,
    )
    .bind(parent_execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find one shard.
pub async fn find_one(
    pool: &PgPool,
    parent_execution_id: Uuid,
    shard_index: i32,
) -> Result<Option<ParallelExecutionShard>, sqlx::Error> {
    let row = sqlx::query_as::<_, ShardRow>(
        r#"
        SELECT parent_execution_id, shard_index, runner_id, status,
               started_at, completed_at, results, error_message
        FROM parallel_execution_shards
        WHERE parent_execution_id = $1 AND shard_index = $2
        "#,
    )
    .bind(parent_execution_id)
    .bind(shard_index)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Queued shards joined with the parent fields the assignment engine needs.
/// Skips parents that are no longer live (e.g. cancelled while shards were
/// waiting).
pub async fn find_queued(pool: &PgPool, limit: i64) -> Result<Vec<QueuedShard>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QueuedShard>(
        r#"
        SELECT s.parent_execution_id, s.shard_index,
               e.test_suite, e.environment,
               e.requested_runner_type, e.requested_runner_id,
               e.metadata
        FROM parallel_execution_shards s
        JOIN executions e ON e.id = s.parent_execution_id
        WHERE s.status = 'queued' AND e.status IN ('queued', 'assigned', 'running')
        ORDER BY e.priority DESC, e.created_at ASC, s.shard_index ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Bind a queued shard to a runner, mirroring
/// `execution::commit_assignment`: slot reservation, shard flip and
/// allocation insert share one transaction.
pub async fn commit_assignment(
    pool: &PgPool,
    parent_execution_id: Uuid,
    shard_index: i32,
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
        UPDATE parallel_execution_shards
        SET status = 'assigned', runner_id = $1
        WHERE parent_execution_id = $2 AND shard_index = $3 AND status = 'queued'
        "#,
    )
    .bind(runner_id)
    .bind(parent_execution_id)
    .bind(shard_index)
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
        VALUES ($1, $2, $3, $4, $5, $6, 'allocated', $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(runner_id)
    .bind(parent_execution_id)
    .bind(shard_index)
    .bind(cpu_allocation)
    .bind(memory_allocation_mb)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Transition assigned → running for one shard.
pub async fn mark_running(
    pool: &PgPool,
    parent_execution_id: Uuid,
    shard_index: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE parallel_execution_shards
        SET status = 'running', started_at = $1
        WHERE parent_execution_id = $2 AND shard_index = $3 AND status = 'assigned'
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(parent_execution_id)
    .bind(shard_index)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Finalize one shard: terminal status, results, allocation release and slot
/// decrement in a single transaction. Returns false when the shard was
/// already terminal (webhook redelivery).
pub async fn finalize(
    pool: &PgPool,
    parent_execution_id: Uuid,
    shard_index: i32,
    status: ExecutionStatus,
    results: Option<&ExecutionResults>,
    error_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    debug_assert!(status.is_terminal());

    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now();

    let updated = sqlx::query(
        r#"
        UPDATE parallel_execution_shards
        SET status = $1, completed_at = $2, results = $3, error_message = $4
        WHERE parent_execution_id = $5 AND shard_index = $6
              AND status IN ('queued', 'assigned', 'running')
        "#,
    )
    .bind(status_to_string(status))
    .bind(now)
    .bind(results.map(|r| serde_json::to_value(r).unwrap_or_default()))
    .bind(error_message)
    .bind(parent_execution_id)
    .bind(shard_index)
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
        WHERE execution_id = $2 AND shard_index = $3 AND status <> 'released'
        RETURNING runner_id
        "#,
    )
    .bind(now)
    .bind(parent_execution_id)
    .bind(shard_index)
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

/// Running shards whose parent's deadline elapsed, for the timeout sweep.
pub async fn find_timed_out(pool: &PgPool) -> Result<Vec<(Uuid, i32)>, sqlx::Error> {
    let rows: Vec<(Uuid, i32)> = sqlx::query_as(
        r#"
        SELECT s.parent_execution_id, s.shard_index
        FROM parallel_execution_shards s
        JOIN executions e ON e.id = s.parent_execution_id
        WHERE s.status = 'running' AND e.timeout_at IS NOT NULL AND e.timeout_at < $1
        "#,
    )
    .bind(chrono::Utc::now())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// =============================================================================
// Database Row Types
// =============================================================================

/// A queued shard plus the parent fields needed to pick a runner for it.
#[derive(Debug, sqlx::FromRow)]
pub struct QueuedShard {
    pub parent_execution_id: Uuid,
    pub shard_index: i32,
    pub test_suite: String,
    pub environment: String,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct ShardRow {
    parent_execution_id: Uuid,
    shard_index: i32,
    runner_id: Option<Uuid>,
    status: String,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    results: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl From<ShardRow> for ParallelExecutionShard {
    fn from(row: ShardRow) -> Self {
        let results = row
            .results
            .and_then(|v| serde_json::from_value(v).ok());

        ParallelExecutionShard {
            parent_execution_id: row.parent_execution_id,
            shard_index: row.shard_index,
            runner_id: row.runner_id,
            status: string_to_status(&row.status),
            started_at: row.started_at,
            completed_at: row.completed_at,
            results,
            error_message: row.error_message,
        }
    }
}
