//! Domain models and strongly-typed identifiers.
//!
//! Defines the durable job row, the notification delivery ledger, the
//! collaborator entities (events, registrations) and newtype ID wrappers
//! for compile-time type safety. Includes database serialization traits
//! and the status enums whose transitions drive the queue lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DEFAULT_MAX_ATTEMPTS;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed job identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. A job keeps its ID
/// across every retry; a fresh job row for the same logical delivery gets a
/// fresh ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for JobId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for JobId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed registration identifier.
///
/// The delivery ledger is keyed by this ID: one confirmation per
/// registration, no matter how many job rows the retries produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    /// Creates a new random registration ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RegistrationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RegistrationId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RegistrationId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RegistrationId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Job lifecycle status.
///
/// ```text
/// pending -> processing -> done
///         ^             -> pending (retry, attempts += 1)
///         |             -> failed  (dead letter)
///         +-- reclaimer resets stale processing rows
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued and eligible for claiming once `run_at` has passed.
    Pending,

    /// Claimed by a worker; `locked_at`/`locked_by` are set.
    Processing,

    /// Terminal success state.
    Done,

    /// Terminal dead-letter state after exhausting `max_attempts`.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for JobStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Durable job row.
///
/// A unit of asynchronous work persisted in the `jobs` table. The payload
/// is opaque JSON; the `job_type` string selects the handler that knows how
/// to decode it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier for this job row.
    pub id: JobId,

    /// Handler registry key, e.g. `registration.confirmation`.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Opaque JSON payload; decoded by the owning handler.
    pub payload: serde_json::Value,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Number of completed reschedules. Incremented only by `Reschedule`;
    /// stale-lock reclaim never touches it.
    pub attempts: i32,

    /// Attempt budget; the job dead-letters once exhausted.
    pub max_attempts: i32,

    /// The job is eligible for claiming once this instant has passed.
    pub run_at: DateTime<Utc>,

    /// When the current owner claimed the row; null unless `processing`.
    pub locked_at: Option<DateTime<Utc>>,

    /// Worker ID of the current owner; null unless `processing`.
    pub locked_by: Option<String>,

    /// Message from the most recent failure, if any.
    pub last_error: Option<String>,

    /// Caller-supplied put-if-absent key; unique where non-null.
    pub idempotency_key: Option<String>,

    /// Higher runs first. Nothing sets it today besides the default 0.
    pub priority: i32,

    /// Actor that enqueued the job; propagated into the execution span.
    pub user_id: Option<Uuid>,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,

    /// Bumped on every transition.
    pub updated_at: DateTime<Utc>,
}

/// Request to enqueue a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Handler registry key.
    pub job_type: String,

    /// Opaque JSON payload.
    pub payload: serde_json::Value,

    /// Earliest execution time; `None` means now.
    pub run_at: Option<DateTime<Utc>>,

    /// Attempt budget; values <= 0 fall back to [`DEFAULT_MAX_ATTEMPTS`].
    pub max_attempts: i32,

    /// Optional put-if-absent key.
    pub idempotency_key: Option<String>,

    /// Claim priority, default 0.
    pub priority: i32,

    /// Actor on whose behalf the job runs.
    pub user_id: Option<Uuid>,
}

impl NewJob {
    /// Creates a request with defaults for everything but type and payload.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            run_at: None,
            max_attempts: 0,
            idempotency_key: None,
            priority: 0,
            user_id: None,
        }
    }
}

impl Job {
    /// Materializes a pending job row from an enqueue request.
    pub fn from_request(req: NewJob, now: DateTime<Utc>) -> Self {
        let max_attempts =
            if req.max_attempts <= 0 { DEFAULT_MAX_ATTEMPTS } else { req.max_attempts };

        Self {
            id: JobId::new(),
            job_type: req.job_type,
            payload: req.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            run_at: req.run_at.unwrap_or(now),
            locked_at: None,
            locked_by: None,
            last_error: None,
            idempotency_key: req.idempotency_key,
            priority: req.priority,
            user_id: req.user_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Delivery ledger status for a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// A job currently owns the send.
    Sending,

    /// The notification went out; terminal.
    Sent,

    /// The last send attempt failed; a later job may claim the retry.
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Per-(kind, registration) delivery ledger row.
///
/// The single source of truth for "did the user get one and only one
/// confirmation". Job rows are not: retries can create fresh job rows for
/// the same logical delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    /// Notification kind, e.g. `registration.confirmation`.
    pub kind: String,

    /// Registration this delivery belongs to; unique together with `kind`.
    pub registration_id: RegistrationId,

    /// Last job that claimed the send.
    pub job_id: JobId,

    /// Destination address.
    pub recipient: String,

    /// Current delivery status.
    pub status: DeliveryStatus,

    /// Set exactly when the record transitions to `sent`.
    pub sent_at: Option<DateTime<Utc>>,

    /// Provider-side message ID, when the provider returns one.
    pub provider_message_id: Option<String>,

    /// Message from the most recent failed send.
    pub last_error: Option<String>,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,

    /// Bumped on every transition.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of attempting to claim a registration confirmation send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new `sending` row was inserted; the caller owns the send.
    Started,

    /// An existing `failed` row was atomically flipped back to `sending`;
    /// the caller owns the retry.
    RetryClaim,

    /// The record is already `sent`; treat as idempotent success.
    AlreadySent,

    /// Another attempt holds the `sending` claim; retry later.
    InProgress,
}

/// Event lifecycle status as seen by the publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created but not yet published.
    Draft,

    /// Published; `mark_published` is a no-op from here on.
    Published,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            _ => Err(format!("invalid event status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Event row as the queue core needs it.
///
/// Admin CRUD for events lives outside the core; the pipeline only requires
/// capacity for the registration check and the idempotent publish flip.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,

    /// Human-readable title.
    pub title: String,

    /// Maximum number of registrations.
    pub capacity: i32,

    /// Draft or published.
    pub status: EventStatus,

    /// Set when the event was published.
    pub published_at: Option<DateTime<Utc>>,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,

    /// Bumped on every update.
    pub updated_at: DateTime<Utc>,
}

/// Registration row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Unique identifier.
    pub id: RegistrationId,

    /// Event registered for.
    pub event_id: EventId,

    /// Actor that registered.
    pub user_id: Uuid,

    /// Attendee name.
    pub name: String,

    /// Attendee email; unique per event.
    pub email: String,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,

    /// Bumped on every update.
    pub updated_at: DateTime<Utc>,
}

/// Request to create a registration.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRegistration {
    /// Event to register for.
    pub event_id: EventId,

    /// Actor performing the registration.
    pub user_id: Uuid,

    /// Attendee name.
    pub name: String,

    /// Attendee email.
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_display_round_trips() {
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Done, JobStatus::Failed]
        {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("delivering".parse::<JobStatus>().is_err());
    }

    #[test]
    fn from_request_applies_defaults() {
        let now = Utc::now();
        let job = Job::from_request(
            NewJob::new("event.publish", serde_json::json!({"eventId": "x"})),
            now,
        );

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, crate::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.run_at, now);
        assert_eq!(job.priority, 0);
        assert!(job.locked_at.is_none() && job.locked_by.is_none());
    }

    #[test]
    fn job_serializes_with_wire_field_names() {
        let now = Utc::now();
        let job = Job::from_request(NewJob::new("event.publish", serde_json::json!({})), now);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["type"], "event.publish");
        assert_eq!(value["status"], "pending");
        assert!(value.get("maxAttempts").is_some());
        assert!(value.get("runAt").is_some());
        assert!(value.get("job_type").is_none());
    }
}
