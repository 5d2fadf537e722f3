//! Resource Allocation Repository
//!
//! Allocation rows are created inside the assignment transaction (see
//! `service::assignment`) and released inside the finalize transactions of
//! the execution and shard repositories. This module covers the standalone
//! reads and the capacity re-check writes.

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::allocation::{AllocationStatus, ResourceAllocation};

/// Live (allocated or exceeded) rows for one runner, oldest first.
pub async fn find_live_by_runner(
    pool: &PgPool,
    runner_id: Uuid,
) -> Result<Vec<ResourceAllocation>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT id, runner_id, execution_id, shard_index, cpu_allocation,
               memory_allocation_mb, status, created_at, released_at
        FROM resource_allocations
        WHERE runner_id = $1 AND status <> 'released'
        ORDER BY created_at ASC
        "#,
    )
    .bind(runner_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Flip a set of rows between `allocated` and `exceeded` after a capacity
/// re-check. Released rows are never touched.
pub async fn set_status(
    pool: &PgPool,
    ids: &[Uuid],
    status: AllocationStatus,
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE resource_allocations
        SET status = $1
        WHERE id = ANY($2) AND status <> 'released'
        "#,
    )
    .bind(status_to_string(status))
    .bind(ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Per-runner allocation summary row.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct RunnerAllocationSummary {
    pub runner_id: Uuid,
    pub allocated_count: i64,
    pub exceeded_count: i64,
    pub cpu_allocated: f64,
    pub memory_allocated_mb: i64,
}

/// Aggregate live allocations across all runners.
pub async fn summarize(pool: &PgPool) -> Result<Vec<RunnerAllocationSummary>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerAllocationSummary>(
        r#"
        SELECT runner_id,
               COUNT(*) FILTER (WHERE status = 'allocated') AS allocated_count,
               COUNT(*) FILTER (WHERE status = 'exceeded') AS exceeded_count,
               COALESCE(SUM(cpu_allocation) FILTER (WHERE status <> 'released'), 0)::float8
                   AS cpu_allocated,
               COALESCE(SUM(memory_allocation_mb) FILTER (WHERE status <> 'released'), 0)::bigint
                   AS memory_allocated_mb
        FROM resource_allocations
        WHERE status <> 'released'
        GROUP BY runner_id
        ORDER BY runner_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// =============================================================================
// Helper Functions
// =============================================================================

pub(crate) fn status_to_string(status: AllocationStatus) -> &'static str {
    match status {
        AllocationStatus::Allocated => "allocated",
        AllocationStatus::Exceeded => "exceeded",
        AllocationStatus::Released => "released",
    }
}

fn string_to_status(s: &str) -> AllocationStatus {
    match s {
        "allocated" => AllocationStatus::Allocated,
        "exceeded" => AllocationStatus::Exceeded,
        "released" => AllocationStatus::Released,
        _ => AllocationStatus::Released,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    runner_id: Uuid,
    execution_id: Uuid,
    shard_index: Option<i32>,
    cpu_allocation: f64,
    memory_allocation_mb: i64,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    released_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<AllocationRow> for ResourceAllocation {
    fn from(row: AllocationRow) -> Self {
        ResourceAllocation {
            id: row.id,
            runner_id: row.runner_id,
            execution_id: row.execution_id,
            shard_index: row.shard_index,
            cpu_allocation: row.cpu_allocation,
            memory_allocation_mb: row.memory_allocation_mb,
            status: string_to_status(&row.status),
            created_at: row.created_at,
            released_at: row.released_at,
        }
    }
}
