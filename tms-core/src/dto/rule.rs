//! Load-balancing rule DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::rule::RuleType;

/// Request to create a load-balancing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRule {
    pub name: String,
    pub rule_type: RuleType,
    pub test_suite_pattern: Option<String>,
    pub environment_pattern: Option<String>,
    pub runner_type_filter: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub rule_config: serde_json::Value,
}

fn default_active() -> bool {
    true
}

/// Creation acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCreated {
    pub rule_id: Uuid,
}
