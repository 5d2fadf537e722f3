//! Load-Balancing Rule Repository

use sqlx::PgPool;
use uuid::Uuid;

use tms_core::domain::rule::{LoadBalancingRule, RuleType};

/// Insert a new rule.
pub async fn create(pool: &PgPool, rule: &LoadBalancingRule) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO load_balancing_rules (
            id, name, rule_type, test_suite_pattern, environment_pattern,
            runner_type_filter, priority, active, rule_config, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(rule.id)
    .bind(&rule.name)
    .bind(rule_type_to_string(rule.rule_type))
    .bind(&rule.test_suite_pattern)
    .bind(&rule.environment_pattern)
    .bind(&rule.runner_type_filter)
    .bind(rule.priority)
    .bind(rule.active)
    .bind(&rule.rule_config)
    .bind(rule.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List all rules, highest precedence first.
pub async fn list_all(pool: &PgPool) -> Result<Vec<LoadBalancingRule>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RuleRow>(
        r#"
        SELECT id, name, rule_type, test_suite_pattern, environment_pattern,
               runner_type_filter, priority, active, rule_config, created_at
        FROM load_balancing_rules
        ORDER BY priority DESC, created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Active rules only, in evaluation order for the assignment engine.
pub async fn list_active(pool: &PgPool) -> Result<Vec<LoadBalancingRule>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RuleRow>(
        r#"
        SELECT id, name, rule_type, test_suite_pattern, environment_pattern,
               runner_type_filter, priority, active, rule_config, created_at
        FROM load_balancing_rules
        WHERE active = TRUE
        ORDER BY priority DESC, created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn rule_type_to_string(rule_type: RuleType) -> &'static str {
    match rule_type {
        RuleType::RoundRobin => "round_robin",
        RuleType::Weighted => "weighted",
        RuleType::Pinned => "pinned",
    }
}

fn string_to_rule_type(s: &str) -> RuleType {
    match s {
        "round_robin" => RuleType::RoundRobin,
        "weighted" => RuleType::Weighted,
        "pinned" => RuleType::Pinned,
        _ => RuleType::RoundRobin,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    rule_type: String,
    test_suite_pattern: Option<String>,
    environment_pattern: Option<String>,
    runner_type_filter: Option<String>,
    priority: i32,
    active: bool,
    rule_config: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<RuleRow> for LoadBalancingRule {
    fn from(row: RuleRow) -> Self {
        LoadBalancingRule {
            id: row.id,
            name: row.name,
            rule_type: string_to_rule_type(&row.rule_type),
            test_suite_pattern: row.test_suite_pattern,
            environment_pattern: row.environment_pattern,
            runner_type_filter: row.runner_type_filter,
            priority: row.priority,
            active: row.active,
            rule_config: row.rule_config,
            created_at: row.created_at,
        }
    }
}
