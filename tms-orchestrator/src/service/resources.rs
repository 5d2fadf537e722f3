//! Resource Allocation Tracker
//!
//! Re-checks per-runner allocation totals against declared capacity and
//! flips oversubscribed rows to `exceeded`. The signal is advisory: the
//! queue never blocks on it and running work is never preempted.

use serde::Serialize;
use uuid::Uuid;

use tms_core::domain::allocation::{AllocationStatus, ResourceAllocation};

use crate::repository::allocation_repository;
use crate::repository::allocation_repository::RunnerAllocationSummary;
use crate::repository::runner_repository;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("runner {0} not found")]
    RunnerNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of one capacity re-check.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationCheck {
    pub runner_id: Uuid,
    pub flagged_exceeded: u64,
    pub restored_allocated: u64,
}

/// Recompute whether a runner's live allocations fit its declared capacity.
/// Rows past the breach point flip to `exceeded`; rows that fit again after
/// releases flip back to `allocated`.
pub async fn optimize_runner_allocations(
    state: &AppState,
    runner_id: Uuid,
) -> Result<AllocationCheck, ResourceError> {
    let runner = runner_repository::find_by_id(&state.pool, runner_id)
        .await?
        .ok_or(ResourceError::RunnerNotFound(runner_id))?;

    let allocations = allocation_repository::find_live_by_runner(&state.pool, runner_id).await?;
    let (to_exceed, to_restore) = partition_over_capacity(
        runner.capabilities.cpu,
        runner.capabilities.memory_mb,
        &allocations,
    );

    let flagged =
        allocation_repository::set_status(&state.pool, &to_exceed, AllocationStatus::Exceeded)
            .await?;
    let restored =
        allocation_repository::set_status(&state.pool, &to_restore, AllocationStatus::Allocated)
            .await?;

    if flagged > 0 {
        tracing::warn!(
            runner_id = %runner_id,
            flagged,
            "Runner capacity oversubscribed"
        );
    }

    Ok(AllocationCheck {
        runner_id,
        flagged_exceeded: flagged,
        restored_allocated: restored,
    })
}

/// Aggregate allocation state across all runners, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SystemResourceSummary {
    pub total_allocated: i64,
    pub total_exceeded: i64,
    pub runners: Vec<RunnerAllocationSummary>,
}

pub async fn system_resource_summary(
    state: &AppState,
) -> Result<SystemResourceSummary, ResourceError> {
    let runners = allocation_repository::summarize(&state.pool).await?;

    let total_allocated = runners.iter().map(|r| r.allocated_count).sum();
    let total_exceeded = runners.iter().map(|r| r.exceeded_count).sum();

    Ok(SystemResourceSummary {
        total_allocated,
        total_exceeded,
        runners,
    })
}

/// Walk live allocations oldest-first, accumulating against capacity, and
/// decide which rows should be `exceeded` and which should return to
/// `allocated`. Oldest-first means established work keeps its standing and
/// the most recent commitments carry the breach flag.
fn partition_over_capacity(
    cpu_capacity: f64,
    memory_capacity_mb: i64,
    allocations: &[ResourceAllocation],
) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut to_exceed = Vec::new();
    let mut to_restore = Vec::new();

    let mut cpu_used = 0.0;
    let mut memory_used = 0;

    for allocation in allocations {
        cpu_used += allocation.cpu_allocation;
        memory_used += allocation.memory_allocation_mb;

        let over = cpu_used > cpu_capacity || memory_used > memory_capacity_mb;

        match (over, allocation.status) {
            (true, AllocationStatus::Allocated) => to_exceed.push(allocation.id),
            (false, AllocationStatus::Exceeded) => to_restore.push(allocation.id),
            _ => {}
        }
    }

    (to_exceed, to_restore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn allocation(id: u128, cpu: f64, memory_mb: i64, status: AllocationStatus) -> ResourceAllocation {
        ResourceAllocation {
            id: Uuid::from_u128(id),
            runner_id: Uuid::from_u128(999),
            execution_id: Uuid::from_u128(id + 1000),
            shard_index: None,
            cpu_allocation: cpu,
            memory_allocation_mb: memory_mb,
            status,
            created_at: Utc::now(),
            released_at: None,
        }
    }

    #[test]
    fn test_within_capacity_flags_nothing() {
        let allocations = vec![
            allocation(1, 1.0, 1024, AllocationStatus::Allocated),
            allocation(2, 1.0, 1024, AllocationStatus::Allocated),
        ];

        let (to_exceed, to_restore) = partition_over_capacity(4.0, 8192, &allocations);
        assert!(to_exceed.is_empty());
        assert!(to_restore.is_empty());
    }

    #[test]
    fn test_rows_past_breach_point_are_flagged() {
        let allocations = vec![
            allocation(1, 2.0, 1024, AllocationStatus::Allocated),
            allocation(2, 2.0, 1024, AllocationStatus::Allocated),
            allocation(3, 1.0, 1024, AllocationStatus::Allocated),
        ];

        // cpu capacity 4.0: the third row pushes usage to 5.0
        let (to_exceed, to_restore) = partition_over_capacity(4.0, 8192, &allocations);
        assert_eq!(to_exceed, vec![Uuid::from_u128(3)]);
        assert!(to_restore.is_empty());
    }

    #[test]
    fn test_memory_breach_also_flags() {
        let allocations = vec![
            allocation(1, 0.5, 6000, AllocationStatus::Allocated),
            allocation(2, 0.5, 6000, AllocationStatus::Allocated),
        ];

        let (to_exceed, _) = partition_over_capacity(8.0, 8192, &allocations);
        assert_eq!(to_exceed, vec![Uuid::from_u128(2)]);
    }

    #[test]
    fn test_exceeded_rows_restore_after_release() {
        // A row flagged during a breach now fits because earlier work released
        let allocations = vec![
            allocation(1, 1.0, 1024, AllocationStatus::Allocated),
            allocation(2, 1.0, 1024, AllocationStatus::Exceeded),
        ];

        let (to_exceed, to_restore) = partition_over_capacity(4.0, 8192, &allocations);
        assert!(to_exceed.is_empty());
        assert_eq!(to_restore, vec![Uuid::from_u128(2)]);
    }
}
