//! Execution metric domain types
//!
//! Append-only time-series samples written on completion and during health
//! checks. Never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One metric sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetric {
    pub execution_id: Option<Uuid>,
    pub runner_id: Option<Uuid>,
    pub metric_type: MetricType,
    pub metric_value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Wall-clock duration of a completed execution, in seconds
    ExecutionTime,
    /// Health probe round-trip, in milliseconds
    HealthCheckResponseTime,
    /// Time an execution spent queued before assignment, in seconds
    QueueWait,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricType::ExecutionTime => "execution_time",
            MetricType::HealthCheckResponseTime => "health_check_response_time",
            MetricType::QueueWait => "queue_wait",
        };
        write!(f, "{}", s)
    }
}
