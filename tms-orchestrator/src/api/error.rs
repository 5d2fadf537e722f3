//! API Error Handling
//!
//! Unified error type and conversion for API responses. Every error body
//! carries a machine-readable `code` alongside the human message; storage
//! errors are logged with full detail and surfaced as opaque 500s.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::assignment::AssignmentError;
use crate::service::queue::QueueError;
use crate::service::registry::RegistryError;
use crate::service::resources::ResourceError;
use crate::service::webhook::WebhookError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    InvalidState(String),
    Unauthorized(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidState(_) => "invalid_state",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::DatabaseError(_) => "database_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (
            status,
            Json(serde_json::json!({ "code": code, "error": message })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => ApiError::NotFound(format!("Execution {} not found", id)),
            QueueError::Validation(msg) => ApiError::Validation(msg),
            QueueError::InvalidState(msg) => ApiError::InvalidState(msg),
            QueueError::Database(err) => ApiError::DatabaseError(err),
            QueueError::Assignment(err) => err.into(),
        }
    }
}

impl From<AssignmentError> for ApiError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::NotFound(id) => {
                ApiError::NotFound(format!("Execution {} not found", id))
            }
            WebhookError::NotParallel(id) => {
                ApiError::InvalidState(format!("Execution {} is not a parallel execution", id))
            }
            WebhookError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(format!("Runner {} not found", id)),
            RegistryError::Validation(msg) => ApiError::Validation(msg),
            RegistryError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::RunnerNotFound(id) => {
                ApiError::NotFound(format!("Runner {} not found", id))
            }
            ResourceError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
