//! Runner DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::runner::{RunnerCapabilities, RunnerStatus};

/// Request to register a runner with the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunner {
    pub name: String,
    pub runner_type: String,
    pub endpoint_url: String,
    pub webhook_url: Option<String>,
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub capabilities: RunnerCapabilities,
    /// Defaults to 1 when absent
    pub max_concurrent_jobs: Option<i32>,
    /// Defaults to 50 when absent
    pub priority: Option<i32>,
}

/// Registration acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistered {
    pub runner_id: Uuid,
}

/// Partial update for a runner.
///
/// The struct itself is the mutation allow-list: anything not representable
/// here cannot be changed through the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerPatch {
    pub status: Option<RunnerStatus>,
    pub priority: Option<i32>,
    pub capabilities: Option<RunnerCapabilities>,
    pub max_concurrent_jobs: Option<i32>,
    pub endpoint_url: Option<String>,
    pub webhook_url: Option<String>,
    pub health_check_url: Option<String>,
}

impl RunnerPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.capabilities.is_none()
            && self.max_concurrent_jobs.is_none()
            && self.endpoint_url.is_none()
            && self.webhook_url.is_none()
            && self.health_check_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patch() {
        assert!(RunnerPatch::default().is_empty());

        let patch = RunnerPatch {
            priority: Some(10),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patch_rejects_unknown_fields_silently() {
        // Fields outside the allow-list are ignored by deserialization, which
        // is what keeps e.g. current_jobs out of caller control.
        let patch: RunnerPatch =
            serde_json::from_str(r#"{"priority": 5, "current_jobs": 99}"#).unwrap();
        assert_eq!(patch.priority, Some(5));
    }
}
