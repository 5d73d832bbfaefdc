//! Handler registry and the canonical job handlers.
//!
//! Handlers register under the job's `type` string and own their payload
//! decoding; the queue hands them opaque JSON. A closed set of variants
//! would also work, but the registry keeps the worker binary in charge of
//! which job types this deployment runs.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use eventhub_core::{
    jobs::{EventPublishPayload, RegistrationConfirmationPayload},
    Job, JobId, StartOutcome,
};

use crate::{
    error::{Result, WorkerError},
    notifier::{ConfirmationRequest, Notifier},
    storage::{DeliveryLedger, EventPublisher},
};

/// Per-execution context handed to handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job row being executed.
    pub job_id: JobId,

    /// Zero-based count of prior reschedules.
    pub attempt: i32,

    /// Actor on whose behalf the job runs, when known.
    pub user_id: Option<Uuid>,
}

impl JobContext {
    /// Builds the execution context for a claimed job.
    pub fn for_job(job: &Job) -> Self {
        Self { job_id: job.id, attempt: job.attempts, user_id: job.user_id }
    }
}

/// A unit of deferred work, selected by the job's `type` string.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Executes the job. A returned error is classified by
    /// [`WorkerError::is_fatal`] and either rescheduled or dead-lettered.
    async fn execute(&self, ctx: JobContext, payload: serde_json::Value) -> Result<()>;
}

/// Maps `type` strings to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any previous entry.
    pub fn register(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    /// Looks up the handler for a type string.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered type strings, for the boot log.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Handles `event.publish`: flips the event to published.
///
/// `mark_published` returning `false` means another job already published
/// the event; that is an idempotent no-op, not a failure.
pub struct PublishEventHandler {
    events: Arc<dyn EventPublisher>,
}

impl PublishEventHandler {
    /// Creates the handler over the events collaborator.
    pub fn new(events: Arc<dyn EventPublisher>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl JobHandler for PublishEventHandler {
    async fn execute(&self, _ctx: JobContext, payload: serde_json::Value) -> Result<()> {
        let payload: EventPublishPayload = serde_json::from_value(payload)
            .map_err(|err| WorkerError::InvalidPayload { message: err.to_string() })?;

        let changed = self.events.mark_published(payload.event_id).await?;
        if changed {
            info!(event_id = %payload.event_id, "event published");
        }
        Ok(())
    }
}

/// Handles `registration.confirmation`: ledger gate, protected send, mark.
///
/// The ledger row, not the job row, decides whether the user already got
/// their one confirmation. Sequence: claim the send, deliver through the
/// protected notifier, then record the outcome. A failure to mark `sent`
/// is logged but not fatal; the user effect already happened.
pub struct RegistrationConfirmationHandler {
    ledger: Arc<dyn DeliveryLedger>,
    notifier: Arc<dyn Notifier>,
}

impl RegistrationConfirmationHandler {
    /// Creates the handler over the ledger and the notifier stack.
    pub fn new(ledger: Arc<dyn DeliveryLedger>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }
}

#[async_trait]
impl JobHandler for RegistrationConfirmationHandler {
    async fn execute(&self, ctx: JobContext, payload: serde_json::Value) -> Result<()> {
        let payload: RegistrationConfirmationPayload = serde_json::from_value(payload)
            .map_err(|err| WorkerError::InvalidPayload { message: err.to_string() })?;

        let registration_id = payload.registration_id;

        match self
            .ledger
            .try_start_registration(ctx.job_id, registration_id, &payload.email)
            .await?
        {
            StartOutcome::AlreadySent => {
                info!(registration_id = %registration_id, "confirmation already sent");
                return Ok(());
            },
            StartOutcome::InProgress => {
                return Err(WorkerError::DeliveryInProgress { registration_id });
            },
            StartOutcome::Started | StartOutcome::RetryClaim => {},
        }

        let request = ConfirmationRequest {
            email: payload.email,
            name: payload.name,
            event_id: payload.event_id,
            registration_id,
        };

        if let Err(err) = self.notifier.send_registration_confirmation(&request).await {
            // Release the claim on any send error, fast-fail included, so a
            // later job can pick the retry up.
            if let Err(mark_err) =
                self.ledger.mark_failed(registration_id, &err.to_string()).await
            {
                warn!(
                    registration_id = %registration_id,
                    error = %mark_err,
                    "failed to record delivery failure"
                );
            }
            return Err(err);
        }

        if let Err(err) = self.ledger.mark_sent(registration_id, None).await {
            warn!(
                registration_id = %registration_id,
                job_id = %ctx.job_id,
                error = %err,
                "confirmation sent but mark-sent failed"
            );
        }
        Ok(())
    }
}
