//! Webhook API Handlers
//!
//! The two runner-facing callback endpoints, gated by a shared bearer token
//! (`TMS_WEBHOOK_TOKEN`). When no token is configured the check is disabled,
//! a permissive default that main logs loudly at startup.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
};
use uuid::Uuid;

use tms_core::dto::webhook::{
    ExecutionResultPayload, ShardResultPayload, WebhookAck,
};

use crate::api::error::{ApiError, ApiResult};
use crate::service::{parallel_service, webhook_service};
use crate::service::webhook::WebhookOutcome;
use crate::state::AppState;

/// POST /webhooks/execution-results
/// Runner → orchestrator progress/completion callback.
pub async fn execution_results(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ExecutionResultPayload>,
) -> ApiResult<Json<WebhookAck>> {
    authorize(&headers, &addr, state.config.webhook_token.as_deref())?;

    tracing::debug!(
        execution_id = %payload.execution_id,
        status = ?payload.status,
        "Received execution result webhook"
    );

    let execution_id = payload.execution_id;
    let outcome = webhook_service::ingest_execution_result(&state, payload).await?;

    Ok(Json(WebhookAck {
        execution_id,
        applied: outcome == WebhookOutcome::Applied,
    }))
}

/// POST /webhooks/parallel-execution/{parent_id}
/// Shard-scoped callback; the parent id rides in the path.
pub async fn parallel_execution_results(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(parent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ShardResultPayload>,
) -> ApiResult<Json<WebhookAck>> {
    authorize(&headers, &addr, state.config.webhook_token.as_deref())?;

    tracing::debug!(
        execution_id = %parent_id,
        shard_index = payload.shard_index,
        status = ?payload.status,
        "Received shard result webhook"
    );

    let outcome = parallel_service::handle_shard_webhook(&state, parent_id, payload).await?;

    Ok(Json(WebhookAck {
        execution_id: parent_id,
        applied: outcome == WebhookOutcome::Applied,
    }))
}

// =============================================================================
// Authentication
// =============================================================================

fn authorize(
    headers: &HeaderMap,
    addr: &SocketAddr,
    expected_token: Option<&str>,
) -> Result<(), ApiError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if check_bearer(presented, expected_token) {
        return Ok(());
    }

    tracing::warn!(source_ip = %addr.ip(), "Webhook authentication failed");
    Err(ApiError::Unauthorized(
        "invalid or missing webhook token".to_string(),
    ))
}

/// Bearer comparison. No configured token means the check is disabled.
fn check_bearer(presented: Option<&str>, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    match presented {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(token) => token == expected,
            None => false,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_configured_token_is_permissive() {
        assert!(check_bearer(None, None));
        assert!(check_bearer(Some("Bearer anything"), None));
    }

    #[test]
    fn test_matching_token_passes() {
        assert!(check_bearer(Some("Bearer s3cret"), Some("s3cret")));
    }

    #[test]
    fn test_bad_or_missing_token_fails() {
        assert!(!check_bearer(Some("Bearer wrong"), Some("s3cret")));
        assert!(!check_bearer(Some("s3cret"), Some("s3cret")));
        assert!(!check_bearer(None, Some("s3cret")));
    }
}
