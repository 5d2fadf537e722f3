//! Execution DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::execution::{ExecutionRequest, ExecutionStatus};
use crate::domain::shard::{ParallelExecutionShard, ShardRollup};

/// Request to submit a new execution.
///
/// `parallel_shards > 1` turns the submission into a parallel parent fanned
/// out across that many shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExecution {
    /// Caller-supplied external handle; generated when absent
    pub execution_id: Option<Uuid>,
    pub test_suite: String,
    pub environment: String,
    #[serde(default)]
    pub priority: i32,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<Uuid>,
    pub parallel_shards: Option<i32>,
    pub estimated_duration_seconds: Option<i64>,
    /// Overrides the configured default execution timeout
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Acknowledgement returned from a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAccepted {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Present for parallel submissions
    pub total_shards: Option<i32>,
}

/// Acknowledgement returned from a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAccepted {
    pub execution_id: Uuid,
    pub retry_of: Uuid,
    pub status: ExecutionStatus,
}

/// Status response for `GET /executions/{id}/status`.
///
/// Regular executions report the full record; parallel parents report the
/// shard rollup with the ordered shard list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionStatusView {
    Parallel(ParallelStatusView),
    Single(ExecutionRequest),
}

/// Shard rollup for a parallel parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStatusView {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(flatten)]
    pub rollup: ShardRollup,
    pub shards: Vec<ParallelExecutionShard>,
}
