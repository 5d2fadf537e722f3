//! Load-balancing rule domain types
//!
//! Rules bias runner selection for matching executions. They are read-only at
//! assignment time: the first active rule (priority descending) whose
//! patterns all match selects the strategy; unmatched requests fall back to
//! least-loaded selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pattern-matching assignment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    /// Glob (`*`) or exact match against the execution's test suite; unset
    /// matches everything.
    pub test_suite_pattern: Option<String>,
    /// Glob or exact match against the execution's environment.
    pub environment_pattern: Option<String>,
    /// Restricts candidate runners to this type.
    pub runner_type_filter: Option<String>,
    pub priority: i32,
    pub active: bool,
    /// Strategy-specific parameters, e.g. `{"runner_id": "..."}` for pinned
    /// rules.
    pub rule_config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Runner-selection strategy a rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    RoundRobin,
    Weighted,
    Pinned,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleType::RoundRobin => "round_robin",
            RuleType::Weighted => "weighted",
            RuleType::Pinned => "pinned",
        };
        write!(f, "{}", s)
    }
}

impl LoadBalancingRule {
    /// Whether this rule applies to an execution with the given suite and
    /// environment. The runner-type filter constrains candidates, not the
    /// match itself.
    pub fn matches(&self, test_suite: &str, environment: &str) -> bool {
        self.active
            && pattern_matches(self.test_suite_pattern.as_deref(), test_suite)
            && pattern_matches(self.environment_pattern.as_deref(), environment)
    }
}

fn pattern_matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None => true,
        Some(p) => wildcard_match(p, value),
    }
}

/// Glob match supporting `*` as "any run of characters". Exact strings match
/// themselves; an empty pattern matches only the empty string.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let mut rest = value;

    // First segment is anchored at the start
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    // Middle segments float; last segment is anchored at the end
    for (i, part) in parts.iter().enumerate().skip(1) {
        if i == parts.len() - 1 {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(wildcard_match("smoke", "smoke"));
        assert!(!wildcard_match("smoke", "smoke-suite"));
        assert!(!wildcard_match("", "smoke"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn test_star_matches_any() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "anything"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(wildcard_match("smoke-*", "smoke-login"));
        assert!(!wildcard_match("smoke-*", "regression-login"));
        assert!(wildcard_match("*-staging", "eu-staging"));
        assert!(!wildcard_match("*-staging", "eu-prod"));
    }

    #[test]
    fn test_infix_wildcard() {
        assert!(wildcard_match("smoke-*-fast", "smoke-login-fast"));
        assert!(!wildcard_match("smoke-*-fast", "smoke-login-slow"));
        assert!(wildcard_match("a*b*c", "a-x-b-y-c"));
        assert!(!wildcard_match("a*b*c", "a-x-c-y-b"));
    }

    #[test]
    fn test_rule_matching() {
        let rule = LoadBalancingRule {
            id: Uuid::new_v4(),
            name: "staging smoke".to_string(),
            rule_type: RuleType::RoundRobin,
            test_suite_pattern: Some("smoke*".to_string()),
            environment_pattern: Some("staging".to_string()),
            runner_type_filter: None,
            priority: 100,
            active: true,
            rule_config: serde_json::json!({}),
            created_at: Utc::now(),
        };

        assert!(rule.matches("smoke-checkout", "staging"));
        assert!(!rule.matches("regression", "staging"));
        assert!(!rule.matches("smoke-checkout", "production"));

        let inactive = LoadBalancingRule {
            active: false,
            ..rule
        };
        assert!(!inactive.matches("smoke-checkout", "staging"));
    }

    #[test]
    fn test_unset_patterns_are_wildcards() {
        let rule = LoadBalancingRule {
            id: Uuid::new_v4(),
            name: "catch-all".to_string(),
            rule_type: RuleType::Weighted,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            priority: 0,
            active: true,
            rule_config: serde_json::json!({}),
            created_at: Utc::now(),
        };

        assert!(rule.matches("anything", "anywhere"));
    }
}
