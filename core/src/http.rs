//! Shared axum glue for the service edges
//!
//! Every service maps the error taxonomy to HTTP the same way; this module
//! keeps that mapping in one place. Internal detail never leaks: the body
//! carries only the stable kind and its message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::Error;

/// Axum-compatible wrapper for the shared error taxonomy
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), "request failed: {}", self.0);
        } else {
            tracing::debug!(kind = self.0.kind(), "request rejected: {}", self.0);
        }
        let body = json!({
            "success": false,
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            },
            "timestamp": Utc::now(),
        });
        (status, Json(body)).into_response()
    }
}

/// Result alias for axum handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
