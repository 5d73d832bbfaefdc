//! Job type contracts shared by producers and the worker.
//!
//! Each job type has a string key into the handler registry, a typed JSON
//! payload, and an idempotency-key builder. The queue itself treats the
//! payload as opaque; only the owning handler decodes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EventId, RegistrationId};

/// Handler key for the event publish job.
pub const TYPE_EVENT_PUBLISH: &str = "event.publish";

/// Handler key for the registration confirmation job.
pub const TYPE_REGISTRATION_CONFIRMATION: &str = "registration.confirmation";

/// Idempotency key for publishing an event: one publish job per event.
pub fn event_publish_key(event_id: EventId) -> String {
    format!("publish:event:{event_id}")
}

/// Idempotency key for a registration confirmation: one job per registration.
pub fn registration_confirmation_key(registration_id: RegistrationId) -> String {
    format!("registration:confirm:{registration_id}")
}

/// Payload of an `event.publish` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPublishPayload {
    /// Event to publish.
    pub event_id: EventId,

    /// Actor that requested the publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<Uuid>,

    /// When the publish was requested.
    pub requested_at: DateTime<Utc>,

    /// Correlation ID of the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Payload of a `registration.confirmation` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfirmationPayload {
    /// Registration the confirmation is for.
    pub registration_id: RegistrationId,

    /// Event registered for.
    pub event_id: EventId,

    /// Destination address.
    pub email: String,

    /// Attendee name.
    pub name: String,

    /// When the confirmation was requested.
    pub requested_at: DateTime<Utc>,

    /// Correlation ID of the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
