//! Error types for medscan-server
//!
//! Maps the core error taxonomy onto HTTP responses. Only public messages
//! reach the client; diagnostic detail (process stderr, filesystem paths,
//! database errors) is logged here and never serialized.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use medscan_common::{Error as CoreError, ErrorKind};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., annotation already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External process failed (500)
    #[error("Upstream failure: {message}")]
    Upstream { message: String, timed_out: bool },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::InvalidArgument => {
                tracing::debug!(error = %err, "Request rejected");
            }
            ErrorKind::UpstreamFailure | ErrorKind::Timeout | ErrorKind::Internal => {
                tracing::error!(error = %err, "Request failed");
            }
        }

        match err {
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            CoreError::Upstream { message, .. } => ApiError::Upstream {
                message,
                timed_out: false,
            },
            CoreError::Timeout(_) => ApiError::Upstream {
                message: "External process timed out".to_string(),
                timed_out: true,
            },
            _ => ApiError::Internal("Internal server error".to_string()),
        }
    }
}

/// Malformed or mistyped JSON bodies are client errors, reported like any other
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "Request body rejected");
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream { message, timed_out } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                if timed_out { "TIMEOUT" } else { "UPSTREAM_FAILURE" },
                message,
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
