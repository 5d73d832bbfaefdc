//! The worker's view of its collaborators.
//!
//! The runtime and the handlers only see these traits; the Postgres
//! repositories implement them below, and the test suite substitutes
//! in-memory stores. Dependencies point one way: worker -> storage traits
//! -> repositories.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use eventhub_core::{
    storage, CoreError, EventId, Job, JobId, RegistrationId, StartOutcome,
};

/// Queue operations the runtime needs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically claims the next eligible job for this worker.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, CoreError>;

    /// Transitions a job to terminal `done`.
    async fn mark_done(&self, id: JobId) -> Result<(), CoreError>;

    /// Transitions a job to terminal `failed` (dead letter).
    async fn mark_failed(&self, id: JobId, err_msg: &str) -> Result<(), CoreError>;

    /// Returns a processing job to `pending` with `attempts + 1`.
    async fn reschedule(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<(), CoreError>;

    /// Resets processing rows whose lock outlived `lock_ttl`.
    async fn requeue_stale_processing(&self, lock_ttl: Duration) -> Result<u64, CoreError>;
}

/// Delivery ledger operations for the confirmation handler.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Attempts to claim the confirmation send for a registration.
    async fn try_start_registration(
        &self,
        job_id: JobId,
        registration_id: RegistrationId,
        recipient: &str,
    ) -> Result<StartOutcome, CoreError>;

    /// Marks the registration's confirmation as sent.
    async fn mark_sent(
        &self,
        registration_id: RegistrationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), CoreError>;

    /// Records a failed send so a later job can claim the retry.
    async fn mark_failed(
        &self,
        registration_id: RegistrationId,
        err_msg: &str,
    ) -> Result<(), CoreError>;
}

/// Events collaborator for the publish handler.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Idempotently flips an event to published; `false` means it already
    /// was (or does not exist), which callers treat as a success no-op.
    async fn mark_published(&self, event_id: EventId) -> Result<bool, CoreError>;
}

#[async_trait]
impl JobQueue for storage::jobs::Repository {
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, CoreError> {
        Self::claim_next(self, worker_id).await
    }

    async fn mark_done(&self, id: JobId) -> Result<(), CoreError> {
        Self::mark_done(self, id).await
    }

    async fn mark_failed(&self, id: JobId, err_msg: &str) -> Result<(), CoreError> {
        Self::mark_failed(self, id, err_msg).await
    }

    async fn reschedule(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<(), CoreError> {
        Self::reschedule(self, id, run_at, err_msg).await
    }

    async fn requeue_stale_processing(&self, lock_ttl: Duration) -> Result<u64, CoreError> {
        Self::requeue_stale_processing(self, lock_ttl).await
    }
}

#[async_trait]
impl DeliveryLedger for storage::deliveries::Repository {
    async fn try_start_registration(
        &self,
        job_id: JobId,
        registration_id: RegistrationId,
        recipient: &str,
    ) -> Result<StartOutcome, CoreError> {
        Self::try_start_registration(self, job_id, registration_id, recipient).await
    }

    async fn mark_sent(
        &self,
        registration_id: RegistrationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), CoreError> {
        Self::mark_sent(self, registration_id, provider_message_id).await
    }

    async fn mark_failed(
        &self,
        registration_id: RegistrationId,
        err_msg: &str,
    ) -> Result<(), CoreError> {
        Self::mark_failed(self, registration_id, err_msg).await
    }
}

#[async_trait]
impl EventPublisher for storage::events::Repository {
    async fn mark_published(&self, event_id: EventId) -> Result<bool, CoreError> {
        Self::mark_published(self, event_id).await
    }
}
