//! Maps `harmonia_core::Error` onto the HTTP response envelope from
//! spec.md §6/§7.
//!
//! Grounded in `original_source/src/api/models/responses.py`'s
//! `ErrorResponse` shape and the status-code table in
//! `original_source/src/api/routers/memory.py`'s exception handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use harmonia_core::ErrorKind;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Wraps `harmonia_core::Error` so it can be returned directly from an
/// axum handler via `?`.
pub struct ApiError(pub harmonia_core::Error);

impl From<harmonia_core::Error> for ApiError {
    fn from(e: harmonia_core::Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = kind.code(), "request failed");
        } else {
            tracing::warn!(error = %self.0, code = kind.code(), "request rejected");
        }
        let body = ErrorResponse {
            success: false,
            error: kind.code().to_lowercase(),
            message: self.0.to_string(),
            timestamp: chrono::Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

/// A bare validation error raised by the HTTP layer itself (bad query
/// params, missing body fields) before any core call is made.
pub fn validation_error(message: impl Into<String>) -> ApiError {
    ApiError(harmonia_core::Error::Validation(message.into()))
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError(harmonia_core::Error::NotFound(message.into()))
}

pub fn auth_error(message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorKind::Auth.code().to_lowercase(),
        message: message.into(),
        timestamp: chrono::Utc::now(),
    };
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(body),
    )
        .into_response()
}

pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorKind::RateLimited.code().to_lowercase(),
        message: message.into(),
        timestamp: chrono::Utc::now(),
    };
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after_secs.to_string())],
        Json(body),
    )
        .into_response()
}
