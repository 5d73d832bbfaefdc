//! API error envelope.
//!
//! Every error response is `{"error":{"code","message"}}`. Storage errors
//! map onto status codes here; handlers deal in kinds only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use eventhub_core::CoreError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request input.
    #[error("{message}")]
    BadRequest {
        /// Stable machine-readable code.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Missing or invalid actor identity.
    #[error("{message}")]
    Unauthorized {
        /// Human-readable detail.
        message: String,
    },

    /// No such resource.
    #[error("{message}")]
    NotFound {
        /// Human-readable detail.
        message: String,
    },

    /// Request conflicts with current state.
    #[error("{message}")]
    Conflict {
        /// Stable machine-readable code.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Anything the client cannot fix.
    #[error("{message}")]
    Internal {
        /// Human-readable detail; internals stay in the logs.
        message: String,
    },
}

impl ApiError {
    /// Convenience constructor for bad requests.
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest { code, message: message.into() }
    }

    /// Convenience constructor for 404s.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Convenience constructor for 500s.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    fn status_and_code(&self) -> (StatusCode, &str) {
        match self {
            Self::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, code),
            Self::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict { code, .. } => (StatusCode::CONFLICT, code),
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(message) => Self::NotFound { message },
            CoreError::AlreadyRegistered => Self::Conflict {
                code: "already_registered",
                message: "this email is already registered for this event".into(),
            },
            CoreError::EventFull => Self::Conflict {
                code: "event_full",
                message: "this event is already at full capacity".into(),
            },
            CoreError::NotFailed { .. } => Self::Conflict {
                code: "job_not_failed",
                message: "only failed jobs can be retried".into(),
            },
            CoreError::InvalidInput(message) => Self::BadRequest { code: "invalid_request", message },
            // DuplicateIdempotencyKey is handled where it is benign; if it
            // reaches here something routed it wrong.
            other => Self::internal(other.to_string()),
        }
    }
}
