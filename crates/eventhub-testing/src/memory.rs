//! In-memory implementations of the worker's collaborator traits.
//!
//! Each store mirrors the semantics of its Postgres counterpart: claim
//! ordering, idempotent enqueue, the failed-to-sending ledger flip, and
//! the stale-lock requeue. State lives behind a plain mutex that is never
//! held across an await.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use eventhub_core::{
    storage::deliveries::KIND_REGISTRATION_CONFIRMATION, CoreError, DeliveryRecord,
    DeliveryStatus, EventId, Job, JobId, JobStatus, NewJob, RegistrationId, StartOutcome,
};
use eventhub_worker::{DeliveryLedger, EventPublisher, JobQueue};

/// In-memory job queue with the Postgres claim semantics.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<JobStoreInner>,
}

#[derive(Default)]
struct JobStoreInner {
    jobs: HashMap<JobId, Job>,
    transitions: Vec<String>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a pending job, enforcing idempotency-key uniqueness.
    pub fn enqueue(&self, req: NewJob) -> Result<Job, CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");

        if let Some(key) = &req.idempotency_key {
            if inner.jobs.values().any(|j| j.idempotency_key.as_deref() == Some(key)) {
                return Err(CoreError::DuplicateIdempotencyKey { key: key.clone() });
            }
        }

        let job = Job::from_request(req, Utc::now());
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Inserts a job row as-is, for seeding non-pending states.
    pub fn insert(&self, job: Job) {
        self.inner.lock().expect("job store lock poisoned").jobs.insert(job.id, job);
    }

    /// Fetches a job by ID.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.inner.lock().expect("job store lock poisoned").jobs.get(&id).cloned()
    }

    /// All rows, in no particular order.
    pub fn all(&self) -> Vec<Job> {
        self.inner.lock().expect("job store lock poisoned").jobs.values().cloned().collect()
    }

    /// Number of rows currently in `status`.
    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner
            .lock()
            .expect("job store lock poisoned")
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Recorded transitions, oldest first: `claimed`, `done`, `failed`,
    /// `rescheduled` and `requeued_stale` entries with their context.
    pub fn transitions(&self) -> Vec<String> {
        self.inner.lock().expect("job store lock poisoned").transitions.clone()
    }

    fn record(inner: &mut JobStoreInner, entry: String) {
        inner.transitions.push(entry);
    }
}

#[async_trait]
impl JobQueue for MemoryJobStore {
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");
        let now = Utc::now();

        let mut eligible: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending && j.run_at <= now && j.attempts < j.max_attempts
            })
            .collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_at.cmp(&b.run_at))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let Some(id) = eligible.first().map(|j| j.id) else {
            return Ok(None);
        };

        let job = inner.jobs.get_mut(&id).expect("claimed job must exist");
        job.status = JobStatus::Processing;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.updated_at = now;
        let claimed = job.clone();

        Self::record(&mut inner, format!("claimed:{id}:{worker_id}"));
        Ok(Some(claimed))
    }

    async fn mark_done(&self, id: JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");
        let job =
            inner.jobs.get_mut(&id).ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;

        job.status = JobStatus::Done;
        job.locked_at = None;
        job.locked_by = None;
        job.last_error = None;
        job.updated_at = Utc::now();

        Self::record(&mut inner, format!("done:{id}"));
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, err_msg: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");
        let job =
            inner.jobs.get_mut(&id).ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;

        job.status = JobStatus::Failed;
        job.locked_at = None;
        job.locked_by = None;
        job.last_error = Some(err_msg.to_string());
        job.updated_at = Utc::now();

        Self::record(&mut inner, format!("failed:{id}:{err_msg}"));
        Ok(())
    }

    async fn reschedule(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");
        let job =
            inner.jobs.get_mut(&id).ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;

        job.status = JobStatus::Pending;
        job.attempts += 1;
        job.run_at = run_at;
        job.locked_at = None;
        job.locked_by = None;
        job.last_error = Some(err_msg.to_string());
        job.updated_at = Utc::now();

        Self::record(&mut inner, format!("rescheduled:{id}:{err_msg}"));
        Ok(())
    }

    async fn requeue_stale_processing(&self, lock_ttl: Duration) -> Result<u64, CoreError> {
        let mut inner = self.inner.lock().expect("job store lock poisoned");
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(lock_ttl).unwrap_or_else(|_| chrono::Duration::zero());

        let mut count = 0u64;
        let mut requeued = Vec::new();
        for job in inner.jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.locked_at.map(|locked_at| locked_at < now - ttl).unwrap_or(false);
            if stale {
                job.status = JobStatus::Pending;
                job.locked_at = None;
                job.locked_by = None;
                job.updated_at = now;
                count += 1;
                requeued.push(job.id);
            }
        }

        for id in requeued {
            Self::record(&mut inner, format!("requeued_stale:{id}"));
        }
        Ok(count)
    }
}

/// In-memory delivery ledger with the atomic failed-to-sending flip.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<RegistrationId, DeliveryRecord>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the ledger row for a registration.
    pub fn record(&self, registration_id: RegistrationId) -> Option<DeliveryRecord> {
        self.records.lock().expect("ledger lock poisoned").get(&registration_id).cloned()
    }
}

#[async_trait]
impl DeliveryLedger for MemoryLedger {
    async fn try_start_registration(
        &self,
        job_id: JobId,
        registration_id: RegistrationId,
        recipient: &str,
    ) -> Result<StartOutcome, CoreError> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let now = Utc::now();

        if let Some(record) = records.get_mut(&registration_id) {
            return match record.status {
                DeliveryStatus::Failed => {
                    record.status = DeliveryStatus::Sending;
                    record.job_id = job_id;
                    record.recipient = recipient.to_string();
                    record.last_error = None;
                    record.updated_at = now;
                    Ok(StartOutcome::RetryClaim)
                },
                DeliveryStatus::Sent => Ok(StartOutcome::AlreadySent),
                DeliveryStatus::Sending => Ok(StartOutcome::InProgress),
            };
        }

        records.insert(
            registration_id,
            DeliveryRecord {
                kind: KIND_REGISTRATION_CONFIRMATION.to_string(),
                registration_id,
                job_id,
                recipient: recipient.to_string(),
                status: DeliveryStatus::Sending,
                sent_at: None,
                provider_message_id: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(StartOutcome::Started)
    }

    async fn mark_sent(
        &self,
        registration_id: RegistrationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        if let Some(record) = records.get_mut(&registration_id) {
            record.status = DeliveryStatus::Sent;
            record.sent_at = Some(Utc::now());
            record.provider_message_id = provider_message_id.map(ToString::to_string);
            record.last_error = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        registration_id: RegistrationId,
        err_msg: &str,
    ) -> Result<(), CoreError> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        if let Some(record) = records.get_mut(&registration_id) {
            record.status = DeliveryStatus::Failed;
            record.last_error = Some(err_msg.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// In-memory events collaborator.
#[derive(Default)]
pub struct MemoryEvents {
    published: Mutex<std::collections::HashSet<EventId>>,
}

impl MemoryEvents {
    /// Creates an empty collaborator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an event has been published.
    pub fn is_published(&self, event_id: EventId) -> bool {
        self.published.lock().expect("events lock poisoned").contains(&event_id)
    }
}

#[async_trait]
impl EventPublisher for MemoryEvents {
    async fn mark_published(&self, event_id: EventId) -> Result<bool, CoreError> {
        Ok(self.published.lock().expect("events lock poisoned").insert(event_id))
    }
}
