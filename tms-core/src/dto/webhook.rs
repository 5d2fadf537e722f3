//! Webhook DTOs
//!
//! Payloads runners deliver back to the orchestrator. These are the only
//! writes that move executions out of `running`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionResults;

/// Progress or completion callback for a regular execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResultPayload {
    pub execution_id: Uuid,
    pub status: ReportedStatus,
    pub results: Option<ExecutionResults>,
    pub error_message: Option<String>,
}

/// Callback for one shard of a parallel execution; the parent id comes from
/// the webhook path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResultPayload {
    pub shard_index: i32,
    pub status: ReportedStatus,
    pub results: Option<ExecutionResults>,
    pub error_message: Option<String>,
}

/// The subset of statuses a runner may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Running,
    Completed,
    Failed,
}

/// Acknowledgement returned to the runner. `applied = false` means the
/// delivery was accepted but produced no state change (redelivery or a
/// post-cancellation callback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub execution_id: Uuid,
    pub applied: bool,
}
