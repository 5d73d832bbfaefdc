//! End-to-end pipeline scenarios against the real runtime.
//!
//! Each test drives the full worker (producer, executor pool, reclaimer,
//! shutdown) over the in-memory stores, so claims, retries, dead-letters
//! and the ledger gate behave exactly as they do against Postgres, minus
//! the network.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use eventhub_core::{
    jobs::{RegistrationConfirmationPayload, TYPE_REGISTRATION_CONFIRMATION},
    DeliveryStatus, EventId, Job, JobStatus, NewJob, RegistrationId,
};
use eventhub_testing::{FlakyNotifier, MemoryEvents, MemoryJobStore, MemoryLedger};
use eventhub_worker::{
    BackoffPolicy, CircuitConfig, HandlerRegistry, JobContext, JobHandler, Notifier,
    ProtectedNotifier, PublishEventHandler, RegistrationConfirmationHandler, Worker, WorkerConfig,
    WorkerError,
};

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        worker_id: "test-worker".into(),
        concurrency: 1,
        shutdown_grace: Duration::from_secs(2),
        // Generous relative to test job runtimes, so the reclaimer only
        // ever touches deliberately backdated locks.
        lock_ttl: Duration::from_secs(60),
        reclaim_interval: Duration::from_millis(25),
        claim_timeout: Duration::from_secs(1),
        readiness_drain: Duration::from_millis(20),
        health_addr: ([127, 0, 0, 1], 0).into(),
    }
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(20),
        cap: Duration::from_millis(100),
        jitter: Duration::from_millis(5),
    }
}

struct Pipeline {
    store: Arc<MemoryJobStore>,
    ledger: Arc<MemoryLedger>,
    events: Arc<MemoryEvents>,
    notifier: Arc<FlakyNotifier>,
    token: CancellationToken,
    handle: JoinHandle<eventhub_worker::Result<()>>,
}

impl Pipeline {
    fn start(notifier: FlakyNotifier, circuit: Option<CircuitConfig>) -> Self {
        Self::start_with(notifier, circuit, worker_config(), |registry| registry)
    }

    fn start_with(
        notifier: FlakyNotifier,
        circuit: Option<CircuitConfig>,
        cfg: WorkerConfig,
        extend: impl FnOnce(HandlerRegistry) -> HandlerRegistry,
    ) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let events = Arc::new(MemoryEvents::new());
        let notifier = Arc::new(notifier);

        let send_stack: Arc<dyn Notifier> = match circuit {
            Some(circuit_cfg) => Arc::new(ProtectedNotifier::new(notifier.clone(), circuit_cfg)),
            None => notifier.clone(),
        };

        let registry = HandlerRegistry::new()
            .register(
                "event.publish",
                Arc::new(PublishEventHandler::new(events.clone())),
            )
            .register(
                TYPE_REGISTRATION_CONFIRMATION,
                Arc::new(RegistrationConfirmationHandler::new(ledger.clone(), send_stack)),
            );
        let registry = extend(registry);

        let worker = Worker::new(cfg, store.clone(), registry, fast_backoff());
        let token = worker.shutdown_token();
        let handle = tokio::spawn(worker.run());

        Self { store, ledger, events, notifier, token, handle }
    }

    async fn shutdown(self) {
        self.token.cancel();
        self.handle.await.expect("worker task join").expect("worker run");
    }
}

fn confirmation_request(registration_id: RegistrationId, email: &str, max_attempts: i32) -> NewJob {
    let payload = RegistrationConfirmationPayload {
        registration_id,
        event_id: EventId::new(),
        email: email.into(),
        name: "Ada".into(),
        requested_at: Utc::now(),
        request_id: None,
    };

    NewJob {
        job_type: TYPE_REGISTRATION_CONFIRMATION.into(),
        payload: serde_json::to_value(&payload).unwrap(),
        run_at: None,
        max_attempts,
        idempotency_key: Some(format!("registration:confirm:{registration_id}")),
        priority: 0,
        user_id: None,
    }
}

async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn happy_path_sends_once_and_completes() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);
    let registration_id = RegistrationId::new();

    let job = pipeline
        .store
        .enqueue(confirmation_request(registration_id, "u@x.test", 3))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
        })
        .await,
        "job should complete"
    );

    assert_eq!(pipeline.notifier.calls(), 1);
    let accepted = pipeline.notifier.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].email, "u@x.test");
    assert_eq!(accepted[0].registration_id, registration_id);

    let record = pipeline.ledger.record(registration_id).expect("ledger row");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert!(record.sent_at.is_some());

    let done = pipeline.store.get(job.id).unwrap();
    assert_eq!(done.attempts, 0);
    assert!(done.locked_at.is_none() && done.locked_by.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let pipeline = Pipeline::start(FlakyNotifier::failing_first(1), None);
    let registration_id = RegistrationId::new();

    let job = pipeline
        .store
        .enqueue(confirmation_request(registration_id, "u@x.test", 3))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
        })
        .await
    );

    assert_eq!(pipeline.notifier.calls(), 2, "one failure, one success");

    let done = pipeline.store.get(job.id).unwrap();
    assert_eq!(done.attempts, 1, "exactly one reschedule");

    let record = pipeline.ledger.record(registration_id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);

    let reschedules = pipeline
        .store
        .transitions()
        .into_iter()
        .filter(|t| t.starts_with("rescheduled:"))
        .count();
    assert_eq!(reschedules, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn persistent_failure_dead_letters() {
    let pipeline = Pipeline::start(FlakyNotifier::failing_first(usize::MAX), None);
    let registration_id = RegistrationId::new();

    let job = pipeline
        .store
        .enqueue(confirmation_request(registration_id, "u@x.test", 2))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
        })
        .await
    );

    assert_eq!(pipeline.notifier.calls(), 2, "both budgeted attempts used");

    let failed = pipeline.store.get(job.id).unwrap();
    assert_eq!(failed.attempts, 1);
    assert!(failed.last_error.as_deref().unwrap_or_default().contains("provider"));

    let record = pipeline.ledger.record(registration_id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert!(record.last_error.is_some());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn open_circuit_fast_fails_then_recovers() {
    let circuit = CircuitConfig {
        timeout: Duration::from_millis(500),
        failure_threshold: 3,
        cooldown: Duration::from_millis(300),
        half_open_max_calls: 1,
    };
    let pipeline = Pipeline::start(FlakyNotifier::failing_first(3), Some(circuit));

    for i in 0..10 {
        pipeline
            .store
            .enqueue(confirmation_request(RegistrationId::new(), &format!("u{i}@x.test"), 10))
            .unwrap();
    }

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(15), || {
            store.count_with_status(JobStatus::Done) == 10
        })
        .await,
        "all jobs should complete after the breaker recovers"
    );

    // Three provider failures open the breaker; every registration still
    // sends exactly once, so exactly thirteen calls reach the provider.
    // Fast-fails while open never do.
    assert_eq!(pipeline.notifier.calls(), 13);
    assert_eq!(pipeline.notifier.accepted().len(), 10);

    let saw_fast_fail = pipeline
        .store
        .transitions()
        .iter()
        .any(|t| t.starts_with("rescheduled:") && t.contains("circuit breaker open"));
    assert!(saw_fast_fail, "at least one job must observe the open circuit");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn duplicate_idempotency_key_enqueues_once_and_sends_once() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);
    let registration_id = RegistrationId::new();

    let first = pipeline
        .store
        .enqueue(confirmation_request(registration_id, "u@x.test", 3))
        .unwrap();
    let second = pipeline.store.enqueue(confirmation_request(registration_id, "u@x.test", 3));

    assert!(matches!(
        second,
        Err(eventhub_core::CoreError::DuplicateIdempotencyKey { .. })
    ));
    assert_eq!(pipeline.store.all().len(), 1);

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(first.id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
        })
        .await
    );

    assert_eq!(pipeline.notifier.calls(), 1, "exactly one email");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn stale_lock_is_reclaimed_and_completed() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);
    let registration_id = RegistrationId::new();

    // A job claimed by a worker that died an hour ago.
    let request = confirmation_request(registration_id, "u@x.test", 3);
    let mut job = Job::from_request(request, Utc::now() - chrono::Duration::hours(1));
    job.status = JobStatus::Processing;
    job.locked_at = Some(Utc::now() - chrono::Duration::hours(1));
    job.locked_by = Some("worker-dead".into());
    let job_id = job.id;
    pipeline.store.insert(job);

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job_id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
        })
        .await,
        "reclaimed job should be claimed again and completed"
    );

    let done = pipeline.store.get(job_id).unwrap();
    assert_eq!(done.attempts, 0, "reclaim must not consume attempts");
    assert!(pipeline
        .store
        .transitions()
        .iter()
        .any(|t| t.starts_with("requeued_stale:")));

    let record = pipeline.ledger.record(registration_id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn unknown_job_type_dead_letters_immediately() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);

    let job = pipeline
        .store
        .enqueue(NewJob::new("registration.export", serde_json::json!({})))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
        })
        .await
    );

    let failed = pipeline.store.get(job.id).unwrap();
    assert_eq!(failed.attempts, 0, "fatal errors must not burn attempts on retries");
    assert!(failed.last_error.as_deref().unwrap_or_default().contains("unknown job type"));
    assert!(!pipeline.store.transitions().iter().any(|t| t.starts_with("rescheduled:")));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_dead_letters_immediately() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);

    let job = pipeline
        .store
        .enqueue(NewJob::new(
            TYPE_REGISTRATION_CONFIRMATION,
            serde_json::json!({"nope": true}),
        ))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
        })
        .await
    );

    let failed = pipeline.store.get(job.id).unwrap();
    assert!(failed.last_error.as_deref().unwrap_or_default().contains("invalid payload"));
    assert_eq!(pipeline.notifier.calls(), 0);

    pipeline.shutdown().await;
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    async fn execute(
        &self,
        _: JobContext,
        _: serde_json::Value,
    ) -> Result<(), WorkerError> {
        panic!("handler blew up");
    }
}

#[tokio::test]
async fn handler_panic_is_recovered_and_retried() {
    let pipeline = Pipeline::start_with(
        FlakyNotifier::reliable(),
        None,
        worker_config(),
        |registry| registry.register("test.panic", Arc::new(PanickingHandler)),
    );

    let mut request = NewJob::new("test.panic", serde_json::json!({}));
    request.max_attempts = 2;
    let job = pipeline.store.enqueue(request).unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
        })
        .await,
        "panicking job should dead-letter after its budget"
    );

    let failed = pipeline.store.get(job.id).unwrap();
    assert_eq!(failed.attempts, 1, "one reschedule before the dead letter");
    assert!(failed.last_error.as_deref().unwrap_or_default().contains("panicked"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn event_publish_is_idempotent_across_jobs() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);
    let event_id = EventId::new();

    let payload = serde_json::json!({
        "eventId": event_id,
        "requestedAt": Utc::now(),
    });
    let first = pipeline
        .store
        .enqueue(NewJob::new("event.publish", payload.clone()))
        .unwrap();
    // A second publish job for the same event, e.g. enqueued before the
    // first one ran; different idempotency window.
    let second = pipeline.store.enqueue(NewJob::new("event.publish", payload)).unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            [first.id, second.id].iter().all(|id| {
                store.get(*id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
            })
        })
        .await,
        "both jobs succeed; the second is a no-op"
    );

    assert!(pipeline.events.is_published(event_id));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_completes_in_flight_work_and_returns() {
    let pipeline = Pipeline::start(FlakyNotifier::reliable(), None);
    let registration_id = RegistrationId::new();

    let job = pipeline
        .store
        .enqueue(confirmation_request(registration_id, "u@x.test", 3))
        .unwrap();

    let store = pipeline.store.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(job.id).map(|j| j.status == JobStatus::Done).unwrap_or(false)
        })
        .await
    );

    let Pipeline { token, handle, .. } = pipeline;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown should finish within the grace and drain windows")
        .expect("worker task join");
    assert!(result.is_ok());
}
