//! Assignment Engine
//!
//! Picks a runner for a queued execution or shard. Selection itself is a
//! pure function over the candidate list so the policy is unit-testable;
//! committing a selection goes through a compare-and-increment reservation
//! in the store, and a lost race simply drops the candidate and reselects.
//!
//! Selection order:
//! 1. an explicit `requested_runner_id` pin (strict unless advisory pinning
//!    is configured),
//! 2. the first matching active load-balancing rule (priority descending),
//! 3. fallback: the eligible runner with the most free capacity.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use tms_core::domain::event::ExecutionEvent;
use tms_core::domain::execution::ExecutionRequest;
use tms_core::domain::rule::{LoadBalancingRule, RuleType, wildcard_match};
use tms_core::domain::runner::TestRunner;

use crate::repository::{execution_repository, rule_repository, runner_repository, shard_repository};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The fields of an execution (or shard) that drive runner selection.
#[derive(Debug, Clone)]
pub struct AssignmentSpec {
    pub test_suite: String,
    pub environment: String,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<Uuid>,
}

impl AssignmentSpec {
    pub fn from_execution(execution: &ExecutionRequest) -> Self {
        Self {
            test_suite: execution.test_suite.clone(),
            environment: execution.environment.clone(),
            requested_runner_type: execution.requested_runner_type.clone(),
            requested_runner_id: execution.requested_runner_id,
        }
    }
}

/// A queued shard plus everything needed to bind it to a runner.
#[derive(Debug, Clone)]
pub struct ShardAssignment {
    pub parent_execution_id: Uuid,
    pub shard_index: i32,
    pub spec: AssignmentSpec,
    pub cpu_allocation: f64,
    pub memory_allocation_mb: i64,
}

/// Stateful part of the engine: per-rule rotation cursors for round-robin
/// and weighted strategies. Process-local on purpose; rotation is advisory
/// and restarting it on reboot is harmless.
pub struct AssignmentEngine {
    cursors: Mutex<HashMap<Uuid, u64>>,
}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn next_cursor(&self, rule_id: Uuid) -> u64 {
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = cursors.entry(rule_id).or_insert(0);
        let value = *counter;
        *counter += 1;
        value
    }

    /// Try to bind a queued execution to a runner. Returns the runner id on
    /// success; `None` means no eligible runner exists right now and the
    /// request stays queued for a later dispatch tick.
    pub async fn assign_execution(
        &self,
        state: &AppState,
        execution: &ExecutionRequest,
    ) -> Result<Option<Uuid>, AssignmentError> {
        let rules = rule_repository::list_active(&state.pool).await?;
        let mut candidates = runner_repository::list_assignable(&state.pool).await?;
        let spec = AssignmentSpec::from_execution(execution);
        let (cpu, memory_mb) = allocation_request(&execution.metadata);

        loop {
            let Some(runner_id) = select_runner(
                &spec,
                &rules,
                &candidates,
                state.config.advisory_pinning,
                |rule_id| self.next_cursor(rule_id),
            ) else {
                return Ok(None);
            };

            let committed = execution_repository::commit_assignment(
                &state.pool,
                execution.id,
                runner_id,
                cpu,
                memory_mb,
            )
            .await?;

            if committed {
                tracing::info!(
                    execution_id = %execution.id,
                    runner_id = %runner_id,
                    "Execution assigned"
                );
                state.events.publish(ExecutionEvent::Assigned {
                    execution_id: execution.id,
                    runner_id,
                    shard_index: None,
                });
                return Ok(Some(runner_id));
            }

            // Either the execution left `queued` (someone cancelled it) or
            // the runner lost its last slot to a concurrent assignment.
            match execution_repository::find_by_id(&state.pool, execution.id).await? {
                Some(current)
                    if current.status == tms_core::domain::execution::ExecutionStatus::Queued =>
                {
                    candidates.retain(|r| r.id != runner_id);
                    if candidates.is_empty() {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    /// Shard flavor of [`assign_execution`]; on success also promotes the
    /// parallel parent out of `queued`.
    pub async fn assign_shard(
        &self,
        state: &AppState,
        shard: &ShardAssignment,
    ) -> Result<Option<Uuid>, AssignmentError> {
        let rules = rule_repository::list_active(&state.pool).await?;
        let mut candidates = runner_repository::list_assignable(&state.pool).await?;

        loop {
            let Some(runner_id) = select_runner(
                &shard.spec,
                &rules,
                &candidates,
                state.config.advisory_pinning,
                |rule_id| self.next_cursor(rule_id),
            ) else {
                return Ok(None);
            };

            let committed = shard_repository::commit_assignment(
                &state.pool,
                shard.parent_execution_id,
                shard.shard_index,
                runner_id,
                shard.cpu_allocation,
                shard.memory_allocation_mb,
            )
            .await?;

            if committed {
                tracing::info!(
                    execution_id = %shard.parent_execution_id,
                    shard_index = shard.shard_index,
                    runner_id = %runner_id,
                    "Shard assigned"
                );
                execution_repository::mark_parent_running(&state.pool, shard.parent_execution_id)
                    .await?;
                state.events.publish(ExecutionEvent::Assigned {
                    execution_id: shard.parent_execution_id,
                    runner_id,
                    shard_index: Some(shard.shard_index),
                });
                return Ok(Some(runner_id));
            }

            let shard_row = shard_repository::find_one(
                &state.pool,
                shard.parent_execution_id,
                shard.shard_index,
            )
            .await?;

            match shard_row {
                Some(s) if s.status == tms_core::domain::execution::ExecutionStatus::Queued => {
                    candidates.retain(|r| r.id != runner_id);
                    if candidates.is_empty() {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
    }
}

impl Default for AssignmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource request carried in execution metadata, with conservative
/// defaults when absent.
pub fn allocation_request(metadata: &HashMap<String, Value>) -> (f64, i64) {
    let cpu = metadata
        .get("cpu_allocation")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    let memory_mb = metadata
        .get("memory_allocation_mb")
        .and_then(|v| v.as_i64())
        .unwrap_or(512);
    (cpu, memory_mb)
}

/// Pure runner selection. `candidates` must be pre-sorted by id ascending
/// (the repository query guarantees this) and `rules` by priority
/// descending. `cursor_for` supplies the rotation position for round-robin
/// and weighted rules.
pub fn select_runner(
    spec: &AssignmentSpec,
    rules: &[LoadBalancingRule],
    candidates: &[TestRunner],
    advisory_pinning: bool,
    mut cursor_for: impl FnMut(Uuid) -> u64,
) -> Option<Uuid> {
    let eligible: Vec<&TestRunner> = candidates
        .iter()
        .filter(|r| r.is_eligible())
        .filter(|r| {
            spec.requested_runner_type
                .as_deref()
                .is_none_or(|t| r.runner_type == t)
        })
        .collect();

    // (1) explicit pin: strict by default, the request waits for its runner
    if let Some(pinned) = spec.requested_runner_id {
        if let Some(runner) = eligible.iter().find(|r| r.id == pinned) {
            return Some(runner.id);
        }
        if !advisory_pinning {
            return None;
        }
    }

    // (2) first matching active rule wins
    for rule in rules {
        if !rule.matches(&spec.test_suite, &spec.environment) {
            continue;
        }
        if let (Some(filter), Some(requested)) = (
            rule.runner_type_filter.as_deref(),
            spec.requested_runner_type.as_deref(),
        ) {
            if !wildcard_match(filter, requested) {
                continue;
            }
        }

        let pool: Vec<&TestRunner> = eligible
            .iter()
            .filter(|r| {
                rule.runner_type_filter
                    .as_deref()
                    .is_none_or(|f| wildcard_match(f, &r.runner_type))
            })
            .copied()
            .collect();

        return match rule.rule_type {
            RuleType::Pinned => {
                let pinned = rule
                    .rule_config
                    .get("runner_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                match pinned {
                    Some(id) => pool.iter().find(|r| r.id == id).map(|r| r.id),
                    // Malformed config cannot pin anything; try the next rule
                    None => continue,
                }
            }
            RuleType::RoundRobin => {
                if pool.is_empty() {
                    None
                } else {
                    let cursor = cursor_for(rule.id);
                    Some(pool[(cursor % pool.len() as u64) as usize].id)
                }
            }
            RuleType::Weighted => weighted_pick(&pool, cursor_for(rule.id)),
        };
    }

    // (3) fallback: most free capacity, ties by priority desc then id asc
    eligible
        .iter()
        .max_by(|a, b| {
            a.free_slots()
                .cmp(&b.free_slots())
                .then(a.priority.cmp(&b.priority))
                .then(b.id.cmp(&a.id))
        })
        .map(|r| r.id)
}

/// Deterministic weighted rotation: the cursor walks cumulative priority
/// ranges, so a runner with twice the priority is picked twice as often.
fn weighted_pick(pool: &[&TestRunner], cursor: u64) -> Option<Uuid> {
    if pool.is_empty() {
        return None;
    }

    let total: u64 = pool.iter().map(|r| r.priority.max(1) as u64).sum();
    let mut position = cursor % total;

    for runner in pool {
        let weight = runner.priority.max(1) as u64;
        if position < weight {
            return Some(runner.id);
        }
        position -= weight;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tms_core::domain::runner::{HealthStatus, RunnerCapabilities, RunnerStatus};

    fn runner(id: u128, runner_type: &str, current: i32, max: i32, priority: i32) -> TestRunner {
        TestRunner {
            id: Uuid::from_u128(id),
            name: format!("runner-{}", id),
            runner_type: runner_type.to_string(),
            endpoint_url: "http://runner:9000".to_string(),
            webhook_url: None,
            health_check_url: None,
            capabilities: RunnerCapabilities::default(),
            max_concurrent_jobs: max,
            current_jobs: current,
            priority,
            status: RunnerStatus::Active,
            health_status: HealthStatus::Healthy,
            consecutive_health_failures: 0,
            last_health_check: None,
            registered_at: Utc::now(),
        }
    }

    fn spec(suite: &str, env: &str) -> AssignmentSpec {
        AssignmentSpec {
            test_suite: suite.to_string(),
            environment: env.to_string(),
            requested_runner_type: None,
            requested_runner_id: None,
        }
    }

    fn rule(id: u128, rule_type: RuleType, priority: i32, config: serde_json::Value) -> LoadBalancingRule {
        LoadBalancingRule {
            id: Uuid::from_u128(id),
            name: format!("rule-{}", id),
            rule_type,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            priority,
            active: true,
            rule_config: config,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fallback_picks_most_free_capacity() {
        let candidates = vec![
            runner(1, "playwright", 2, 3, 50),
            runner(2, "playwright", 0, 4, 50),
            runner(3, "playwright", 1, 2, 50),
        ];

        let selected = select_runner(&spec("smoke", "staging"), &[], &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_fallback_ties_broken_by_priority_then_id() {
        // Same free capacity; higher priority wins
        let candidates = vec![
            runner(1, "playwright", 0, 2, 40),
            runner(2, "playwright", 0, 2, 60),
        ];
        let selected = select_runner(&spec("smoke", "staging"), &[], &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(2)));

        // Same capacity and priority; lowest id wins for determinism
        let candidates = vec![
            runner(7, "playwright", 0, 2, 50),
            runner(3, "playwright", 0, 2, 50),
        ];
        let selected = select_runner(&spec("smoke", "staging"), &[], &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(3)));
    }

    #[test]
    fn test_unhealthy_runner_never_selected() {
        let mut sick = runner(1, "playwright", 0, 4, 90);
        sick.health_status = HealthStatus::Unhealthy;
        let healthy = runner(2, "playwright", 3, 4, 10);

        let candidates = vec![sick, healthy];
        let selected = select_runner(&spec("smoke", "staging"), &[], &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_no_eligible_runner_returns_none() {
        let candidates = vec![runner(1, "playwright", 1, 1, 50)];
        let selected = select_runner(&spec("smoke", "staging"), &[], &candidates, false, |_| 0);
        assert_eq!(selected, None);
    }

    #[test]
    fn test_strict_pin_waits_for_its_runner() {
        let candidates = vec![
            runner(1, "playwright", 1, 1, 50), // pinned but full
            runner(2, "playwright", 0, 1, 50),
        ];

        let mut pinned_spec = spec("smoke", "staging");
        pinned_spec.requested_runner_id = Some(Uuid::from_u128(1));

        // Strict pinning: not silently reassigned elsewhere
        assert_eq!(
            select_runner(&pinned_spec, &[], &candidates, false, |_| 0),
            None
        );

        // Advisory pinning falls through to normal selection
        assert_eq!(
            select_runner(&pinned_spec, &[], &candidates, true, |_| 0),
            Some(Uuid::from_u128(2))
        );
    }

    #[test]
    fn test_pin_honored_when_eligible() {
        let candidates = vec![
            runner(1, "playwright", 0, 2, 10),
            runner(2, "playwright", 0, 8, 99),
        ];

        let mut pinned_spec = spec("smoke", "staging");
        pinned_spec.requested_runner_id = Some(Uuid::from_u128(1));

        assert_eq!(
            select_runner(&pinned_spec, &[], &candidates, false, |_| 0),
            Some(Uuid::from_u128(1))
        );
    }

    #[test]
    fn test_requested_type_filters_candidates() {
        let candidates = vec![
            runner(1, "selenium", 0, 4, 50),
            runner(2, "playwright", 0, 1, 50),
        ];

        let mut typed_spec = spec("smoke", "staging");
        typed_spec.requested_runner_type = Some("playwright".to_string());

        assert_eq!(
            select_runner(&typed_spec, &[], &candidates, false, |_| 0),
            Some(Uuid::from_u128(2))
        );
    }

    #[test]
    fn test_round_robin_rotates() {
        let candidates = vec![
            runner(1, "playwright", 0, 4, 50),
            runner(2, "playwright", 0, 4, 50),
            runner(3, "playwright", 0, 4, 50),
        ];
        let rules = vec![rule(10, RuleType::RoundRobin, 100, serde_json::json!({}))];

        let mut cursor = 0u64;
        let mut picks = Vec::new();
        for _ in 0..4 {
            let pick = select_runner(&spec("smoke", "staging"), &rules, &candidates, false, |_| {
                let c = cursor;
                cursor += 1;
                c
            });
            picks.push(pick.unwrap());
        }

        assert_eq!(
            picks,
            vec![
                Uuid::from_u128(1),
                Uuid::from_u128(2),
                Uuid::from_u128(3),
                Uuid::from_u128(1),
            ]
        );
    }

    #[test]
    fn test_rule_precedence_by_priority() {
        let candidates = vec![
            runner(1, "playwright", 0, 4, 50),
            runner(2, "selenium", 0, 4, 50),
        ];

        let mut low = rule(10, RuleType::RoundRobin, 10, serde_json::json!({}));
        low.runner_type_filter = Some("playwright".to_string());
        let mut high = rule(11, RuleType::RoundRobin, 90, serde_json::json!({}));
        high.runner_type_filter = Some("selenium".to_string());

        // rules arrive priority-descending from the repository
        let rules = vec![high, low];
        let selected = select_runner(&spec("smoke", "staging"), &rules, &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_non_matching_rule_falls_through() {
        let candidates = vec![runner(1, "playwright", 0, 4, 50)];

        let mut scoped = rule(10, RuleType::RoundRobin, 100, serde_json::json!({}));
        scoped.test_suite_pattern = Some("regression-*".to_string());

        let rules = vec![scoped];
        // Rule doesn't match "smoke", so fallback applies
        let selected = select_runner(&spec("smoke", "staging"), &rules, &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn test_pinned_rule_selects_configured_runner() {
        let candidates = vec![
            runner(1, "playwright", 0, 4, 50),
            runner(2, "playwright", 0, 4, 50),
        ];

        let pinned = rule(
            10,
            RuleType::Pinned,
            100,
            serde_json::json!({ "runner_id": Uuid::from_u128(2).to_string() }),
        );

        let selected =
            select_runner(&spec("smoke", "staging"), &[pinned], &candidates, false, |_| 0);
        assert_eq!(selected, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_pinned_rule_with_full_runner_keeps_request_queued() {
        let candidates = vec![
            runner(1, "playwright", 0, 4, 50),
            runner(2, "playwright", 4, 4, 50),
        ];

        let pinned = rule(
            10,
            RuleType::Pinned,
            100,
            serde_json::json!({ "runner_id": Uuid::from_u128(2).to_string() }),
        );

        let selected =
            select_runner(&spec("smoke", "staging"), &[pinned], &candidates, false, |_| 0);
        assert_eq!(selected, None);
    }

    #[test]
    fn test_weighted_distribution() {
        // priority 3 vs 1: cursor walks the cumulative ranges [0,3) and [3,4)
        let candidates = vec![
            runner(1, "playwright", 0, 9, 3),
            runner(2, "playwright", 0, 9, 1),
        ];
        let rules = vec![rule(10, RuleType::Weighted, 100, serde_json::json!({}))];

        let mut picks = Vec::new();
        for cursor in 0..4u64 {
            let pick =
                select_runner(&spec("smoke", "staging"), &rules, &candidates, false, |_| cursor);
            picks.push(pick.unwrap());
        }

        let first = picks.iter().filter(|p| **p == Uuid::from_u128(1)).count();
        let second = picks.iter().filter(|p| **p == Uuid::from_u128(2)).count();
        assert_eq!(first, 3);
        assert_eq!(second, 1);
    }

    #[test]
    fn test_allocation_request_defaults_and_overrides() {
        let empty = HashMap::new();
        assert_eq!(allocation_request(&empty), (1.0, 512));

        let mut metadata = HashMap::new();
        metadata.insert("cpu_allocation".to_string(), serde_json::json!(2.5));
        metadata.insert("memory_allocation_mb".to_string(), serde_json::json!(2048));
        assert_eq!(allocation_request(&metadata), (2.5, 2048));
    }
}
