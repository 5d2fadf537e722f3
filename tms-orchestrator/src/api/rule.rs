//! Load-Balancing Rule API Handlers

use axum::{Json, extract::State, http::StatusCode};
use uuid::Uuid;

use tms_core::domain::rule::LoadBalancingRule;
use tms_core::dto::rule::{CreateRule, RuleCreated};

use crate::api::error::{ApiError, ApiResult};
use crate::repository::rule_repository;
use crate::state::AppState;

/// POST /load-balancing-rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRule>,
) -> ApiResult<(StatusCode, Json<RuleCreated>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }

    let rule = LoadBalancingRule {
        id: Uuid::new_v4(),
        name: req.name,
        rule_type: req.rule_type,
        test_suite_pattern: req.test_suite_pattern,
        environment_pattern: req.environment_pattern,
        runner_type_filter: req.runner_type_filter,
        priority: req.priority,
        active: req.active,
        rule_config: req.rule_config,
        created_at: chrono::Utc::now(),
    };

    tracing::info!(rule_id = %rule.id, name = %rule.name, "Creating load-balancing rule");

    rule_repository::create(&state.pool, &rule).await?;

    Ok((StatusCode::CREATED, Json(RuleCreated { rule_id: rule.id })))
}

/// GET /load-balancing-rules
/// Ordered by priority descending, which is the evaluation order.
pub async fn list_rules(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LoadBalancingRule>>> {
    tracing::debug!("Listing load-balancing rules");

    let rules = rule_repository::list_all(&state.pool).await?;

    Ok(Json(rules))
}
