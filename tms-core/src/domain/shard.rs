//! Parallel execution shard domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{ExecutionResults, ExecutionStatus};

/// One of N parallel sub-executions of a sharded request.
///
/// Shards are keyed by `(parent_execution_id, shard_index)`; indices for a
/// given parent are contiguous `0..total_shards` and created in one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelExecutionShard {
    pub parent_execution_id: Uuid,
    pub shard_index: i32,
    pub runner_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Option<ExecutionResults>,
    pub error_message: Option<String>,
}

/// Aggregate view of a parallel parent, computed from its shard list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRollup {
    pub total_shards: i32,
    pub completed_shards: i32,
    pub failed_shards: i32,
    pub cancelled_shards: i32,
    pub running_shards: i32,
    pub queued_shards: i32,
}

impl ShardRollup {
    /// Compute shard counts. `running_shards` counts everything dispatched
    /// but not yet terminal (assigned or running).
    pub fn from_shards(total_shards: i32, shards: &[ParallelExecutionShard]) -> ShardRollup {
        let mut rollup = ShardRollup {
            total_shards,
            completed_shards: 0,
            failed_shards: 0,
            cancelled_shards: 0,
            running_shards: 0,
            queued_shards: 0,
        };

        for shard in shards {
            match shard.status {
                ExecutionStatus::Completed => rollup.completed_shards += 1,
                ExecutionStatus::Failed => rollup.failed_shards += 1,
                ExecutionStatus::Cancelled => rollup.cancelled_shards += 1,
                ExecutionStatus::Assigned | ExecutionStatus::Running => {
                    rollup.running_shards += 1
                }
                ExecutionStatus::Queued => rollup.queued_shards += 1,
            }
        }

        rollup
    }

    /// The parent is complete only when every shard has reached a terminal
    /// state; partial completion is reported via the individual counts.
    pub fn all_terminal(&self) -> bool {
        self.completed_shards + self.failed_shards + self.cancelled_shards == self.total_shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(index: i32, status: ExecutionStatus) -> ParallelExecutionShard {
        ParallelExecutionShard {
            parent_execution_id: Uuid::new_v4(),
            shard_index: index,
            runner_id: None,
            status,
            started_at: None,
            completed_at: None,
            results: None,
            error_message: None,
        }
    }

    #[test]
    fn test_rollup_counts() {
        let shards = vec![
            shard(0, ExecutionStatus::Completed),
            shard(1, ExecutionStatus::Completed),
            shard(2, ExecutionStatus::Running),
        ];

        let rollup = ShardRollup::from_shards(3, &shards);
        assert_eq!(rollup.completed_shards, 2);
        assert_eq!(rollup.running_shards, 1);
        assert_eq!(rollup.failed_shards, 0);
        assert!(!rollup.all_terminal());
    }

    #[test]
    fn test_rollup_complete_only_when_all_terminal() {
        let shards = vec![
            shard(0, ExecutionStatus::Completed),
            shard(1, ExecutionStatus::Failed),
            shard(2, ExecutionStatus::Cancelled),
        ];

        let rollup = ShardRollup::from_shards(3, &shards);
        assert!(rollup.all_terminal());
        assert_eq!(rollup.failed_shards, 1);
    }

    #[test]
    fn test_rollup_counts_assigned_as_running() {
        let shards = vec![
            shard(0, ExecutionStatus::Assigned),
            shard(1, ExecutionStatus::Queued),
        ];

        let rollup = ShardRollup::from_shards(2, &shards);
        assert_eq!(rollup.running_shards, 1);
        assert_eq!(rollup.queued_shards, 1);
        assert!(!rollup.all_terminal());
    }
}
