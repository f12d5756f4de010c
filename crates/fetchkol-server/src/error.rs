//! API error types for the fetchkol server.
//!
//! Maps core domain errors to HTTP status codes and JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fetchkol_core::error::TaskError;
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// Bad request (unknown platform, invalid count, negative bounds).
    BadRequest(String),
    /// Requested resource not found.
    NotFound(String),
    /// Internal storage or coordination error.
    Internal(String),
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Storage { source } => {
                tracing::error!("storage error: {source}");
                Self::Internal(source.to_string())
            }
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
