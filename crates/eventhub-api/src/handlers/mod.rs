//! Request handlers.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::ApiError;

pub mod admin_jobs;
pub mod health;
pub mod jobs;
pub mod registrations;

pub use admin_jobs::{get_job, list_jobs, reprocess_dead, retry_job};
pub use health::{healthz, readyz};
pub use jobs::publish_event;
pub use registrations::register;

/// Actor identity, populated by the authentication middleware in front of
/// this service.
///
/// # Errors
///
/// Returns `Unauthorized` when the header is missing or not a UUID.
pub(crate) fn require_actor(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-actor-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or(ApiError::Unauthorized { message: "missing identity".into() })
}

/// Correlation ID injected by the request-id middleware.
pub(crate) fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}
