use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors returned by the auth routes. Messages are user-facing.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing or malformed input.
    #[error("{0}")]
    BadRequest(String),

    /// Credentials or reset link rejected.
    #[error("{0}")]
    Unauthorized(String),

    /// Too many attempts from one client.
    #[error("{message}")]
    RateLimited {
        message: &'static str,
        retry_after: Duration,
    },

    /// Rate-limit store or provider plumbing failed.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            Self::RateLimited {
                message,
                retry_after,
            } => {
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": message })))
                        .into_response();
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from(retry_after.as_secs().max(1)),
                );
                response
            }
            Self::Internal(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "An error occurred. Please try again later." })),
                )
                    .into_response()
            }
        }
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
