//! Execution request domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single test-suite execution request, from submission to terminal state.
///
/// Rows with `total_shards` set are parallel parents: their actual work lives
/// in `ParallelExecutionShard` rows and their terminal status is computed by
/// aggregating shard outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub test_suite: String,
    pub environment: String,
    pub priority: i32,
    pub status: ExecutionStatus,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<Uuid>,
    pub assigned_runner_id: Option<Uuid>,
    pub estimated_duration_seconds: Option<i64>,
    pub timeout_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: i32,
    pub retry_of: Option<Uuid>,
    pub total_shards: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub assigned_at: Option<chrono::DateTime<chrono::Utc>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub results: Option<ExecutionResults>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionRequest {
    /// Whether this row is a parallel parent rather than a directly
    /// assignable execution.
    pub fn is_parallel_parent(&self) -> bool {
        self.total_shards.is_some()
    }
}

/// Execution lifecycle status
///
/// Transitions are strictly ordered: queued → assigned → running → terminal.
/// Cancellation is permitted from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states admit no further transitions except via an explicit
    /// retry, which creates a new execution referencing this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether cancellation is still permitted.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Assigned => "assigned",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Test outcome bundle reported by a runner on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub total: i32,
    pub passed: i32,
    pub failed: i32,
    pub skipped: i32,
    pub duration_seconds: f64,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ExecutionResults {
    /// Sum two result bundles, used when rolling shard outcomes up into a
    /// parallel parent.
    pub fn merge(&self, other: &ExecutionResults) -> ExecutionResults {
        ExecutionResults {
            total: self.total + other.total,
            passed: self.passed + other.passed,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
            duration_seconds: self.duration_seconds.max(other.duration_seconds),
            artifacts: self
                .artifacts
                .iter()
                .chain(other.artifacts.iter())
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Assigned.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_cancellable_states() {
        assert!(ExecutionStatus::Queued.is_cancellable());
        assert!(ExecutionStatus::Assigned.is_cancellable());
        assert!(ExecutionStatus::Running.is_cancellable());
        assert!(!ExecutionStatus::Completed.is_cancellable());
    }

    #[test]
    fn test_merge_results() {
        let a = ExecutionResults {
            total: 10,
            passed: 8,
            failed: 1,
            skipped: 1,
            duration_seconds: 12.5,
            artifacts: vec!["report-0.html".to_string()],
        };
        let b = ExecutionResults {
            total: 5,
            passed: 5,
            failed: 0,
            skipped: 0,
            duration_seconds: 30.0,
            artifacts: vec!["report-1.html".to_string()],
        };

        let merged = a.merge(&b);
        assert_eq!(merged.total, 15);
        assert_eq!(merged.passed, 13);
        assert_eq!(merged.failed, 1);
        assert_eq!(merged.skipped, 1);
        // Shards run concurrently, so wall time is the slowest shard
        assert_eq!(merged.duration_seconds, 30.0);
        assert_eq!(merged.artifacts.len(), 2);
    }
}
