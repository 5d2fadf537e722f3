//! Runner domain model
//!
//! Represents an external execution agent that runs test suites and reports
//! back through webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered test runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunner {
    /// Unique identifier for the runner
    pub id: Uuid,

    /// Human-readable runner name
    pub name: String,

    /// Category of execution agent (e.g. "playwright", "selenium-grid")
    pub runner_type: String,

    /// Base URL where the orchestrator dispatches work
    pub endpoint_url: String,

    /// URL the runner reports results back to
    pub webhook_url: Option<String>,

    /// URL probed by the health monitor
    pub health_check_url: Option<String>,

    /// Declared capacity and capability tags
    pub capabilities: RunnerCapabilities,

    /// Maximum executions this runner accepts concurrently
    pub max_concurrent_jobs: i32,

    /// Executions currently assigned or running on this runner
    pub current_jobs: i32,

    /// Assignment weight, higher wins ties and weighted selection
    pub priority: i32,

    /// Administrative status
    pub status: RunnerStatus,

    /// Probe-derived health
    pub health_status: HealthStatus,

    /// Consecutive failed probes, reset on success
    pub consecutive_health_failures: i32,

    /// Last time the health monitor probed this runner
    pub last_health_check: Option<DateTime<Utc>>,

    /// When this runner was registered
    pub registered_at: DateTime<Utc>,
}

impl TestRunner {
    /// Remaining concurrent-job capacity.
    pub fn free_slots(&self) -> i32 {
        (self.max_concurrent_jobs - self.current_jobs).max(0)
    }

    /// Whether the assignment engine may hand work to this runner.
    ///
    /// A runner must be administratively active, not demoted by the health
    /// monitor, and have a free slot. `HealthStatus::Unknown` (never probed)
    /// stays eligible so freshly registered runners can take work.
    pub fn is_eligible(&self) -> bool {
        self.status == RunnerStatus::Active
            && self.health_status != HealthStatus::Unhealthy
            && self.free_slots() > 0
    }
}

/// Administrative status of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Accepting work
    Active,

    /// Soft-disabled by an operator
    Inactive,

    /// Temporarily out of rotation for upkeep
    Maintenance,

    /// Faulted; kept for audit, never assigned
    Error,
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunnerStatus::Active => "active",
            RunnerStatus::Inactive => "inactive",
            RunnerStatus::Maintenance => "maintenance",
            RunnerStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Probe-derived health of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Declared runner capacity and capability tags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerCapabilities {
    /// CPU cores the runner has available for allocations
    pub cpu: f64,

    /// Memory in MB the runner has available for allocations
    pub memory_mb: i64,

    /// Free-form capability tags (e.g. "chromium", "mobile-emulation")
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for RunnerCapabilities {
    fn default() -> Self {
        Self {
            cpu: 4.0,
            memory_mb: 8192,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(status: RunnerStatus, health: HealthStatus, current: i32, max: i32) -> TestRunner {
        TestRunner {
            id: Uuid::new_v4(),
            name: "runner".to_string(),
            runner_type: "playwright".to_string(),
            endpoint_url: "http://runner:9000".to_string(),
            webhook_url: None,
            health_check_url: None,
            capabilities: RunnerCapabilities::default(),
            max_concurrent_jobs: max,
            current_jobs: current,
            priority: 50,
            status,
            health_status: health,
            consecutive_health_failures: 0,
            last_health_check: None,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_eligibility() {
        assert!(runner(RunnerStatus::Active, HealthStatus::Healthy, 0, 1).is_eligible());
        assert!(runner(RunnerStatus::Active, HealthStatus::Unknown, 0, 1).is_eligible());
        assert!(!runner(RunnerStatus::Active, HealthStatus::Unhealthy, 0, 1).is_eligible());
        assert!(!runner(RunnerStatus::Inactive, HealthStatus::Healthy, 0, 1).is_eligible());
        assert!(!runner(RunnerStatus::Maintenance, HealthStatus::Healthy, 0, 1).is_eligible());
        assert!(!runner(RunnerStatus::Active, HealthStatus::Healthy, 1, 1).is_eligible());
    }

    #[test]
    fn test_free_slots_never_negative() {
        // current_jobs can momentarily overshoot while a release is in flight
        assert_eq!(runner(RunnerStatus::Active, HealthStatus::Healthy, 3, 2).free_slots(), 0);
    }
}
