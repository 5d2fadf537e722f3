//! Resource allocation domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capacity committed to a runner for the duration of one execution (or one
/// shard of a parallel execution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub id: Uuid,
    pub runner_id: Uuid,
    pub execution_id: Uuid,
    /// Set when the allocation belongs to a shard rather than the whole
    /// execution.
    pub shard_index: Option<i32>,
    pub cpu_allocation: f64,
    pub memory_allocation_mb: i64,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Allocation lifecycle
///
/// `Exceeded` is a soft signal that a runner's declared capacity is
/// oversubscribed; existing work is never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    Exceeded,
    Released,
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AllocationStatus::Allocated => "allocated",
            AllocationStatus::Exceeded => "exceeded",
            AllocationStatus::Released => "released",
        };
        write!(f, "{}", s)
    }
}
