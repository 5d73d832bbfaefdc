//! The worker runtime: poll, claim, dispatch, reclaim, shut down.
//!
//! One producer task claims up to `concurrency` jobs per poll tick and
//! feeds a bounded channel; N executor tasks drain it. A reclaimer resets
//! stale `processing` rows on its own interval. All waits are
//! cancellation-aware; shutdown flips readiness off, stops claiming,
//! closes the channel, drains in-flight executors within the grace window
//! and keeps the health endpoint answering `not_ready` for a short
//! observation window before the process exits.

use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use eventhub_core::{Clock, Job, RealClock};

use crate::{
    backoff::BackoffPolicy,
    error::{Result, WorkerError},
    handlers::{HandlerRegistry, JobContext},
    health::health_router,
    metrics::JobMetrics,
    storage::JobQueue,
};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the producer polls for claimable jobs.
    pub poll_interval: Duration,

    /// Stable per-process worker ID, recorded in `locked_by`.
    pub worker_id: String,

    /// Number of executor tasks.
    pub concurrency: usize,

    /// How long shutdown waits for in-flight executors.
    pub shutdown_grace: Duration,

    /// Age after which a `processing` lock is considered abandoned.
    pub lock_ttl: Duration,

    /// How often the reclaimer scans for stale locks.
    pub reclaim_interval: Duration,

    /// Per-claim (and per-housekeeping-call) timeout.
    pub claim_timeout: Duration,

    /// How long `/readyz` keeps answering `not_ready` before the health
    /// server closes, so external probes observe the flip.
    pub readiness_drain: Duration,

    /// Bind address of the health server.
    pub health_addr: SocketAddr,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            worker_id: format!("worker-{}", std::process::id()),
            concurrency: 4,
            shutdown_grace: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(30),
            reclaim_interval: Duration::from_secs(10),
            claim_timeout: Duration::from_secs(2),
            readiness_drain: Duration::from_secs(5),
            health_addr: ([127, 0, 0, 1], 8081).into(),
        }
    }
}

/// Queue worker: producer loop, executor pool, reclaimer and health server.
pub struct Worker {
    cfg: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    backoff: BackoffPolicy,
    metrics: Arc<JobMetrics>,
    clock: Arc<dyn Clock>,
    ready: Arc<RwLock<bool>>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Creates a worker over the queue and handler registry.
    pub fn new(
        cfg: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        registry: HandlerRegistry,
        backoff: BackoffPolicy,
    ) -> Self {
        let cfg = WorkerConfig {
            concurrency: cfg.concurrency.max(1),
            ..cfg
        };

        Self {
            cfg,
            queue,
            registry: Arc::new(registry),
            backoff,
            metrics: Arc::new(JobMetrics::new()),
            clock: Arc::new(RealClock::new()),
            ready: Arc::new(RwLock::new(true)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replaces the clock, for tests that need tighter timing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token that stops the runtime when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Lifetime counters, for embedding and tests.
    pub fn metrics(&self) -> Arc<JobMetrics> {
        self.metrics.clone()
    }

    /// Runs until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the health server cannot bind; queue errors inside
    /// the loops are logged and retried, never fatal.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.cfg.worker_id,
            concurrency = self.cfg.concurrency,
            poll_interval_ms = self.cfg.poll_interval.as_millis() as u64,
            job_types = ?self.registry.job_types(),
            "worker starting"
        );

        let health_handle = self.spawn_health_server().await?;
        self.spawn_reclaimer();
        self.spawn_metrics_logger();

        let (tx, rx) = mpsc::channel::<Job>(1);
        let rx = Arc::new(Mutex::new(rx));

        let executor = Arc::new(Executor {
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            backoff: self.backoff.clone(),
            metrics: self.metrics.clone(),
            worker_id: self.cfg.worker_id.clone(),
        });

        let mut executor_handles = Vec::with_capacity(self.cfg.concurrency);
        for executor_num in 0..self.cfg.concurrency {
            let executor = executor.clone();
            let rx = rx.clone();
            executor_handles.push(tokio::spawn(async move {
                executor.run(executor_num, rx).await;
            }));
        }

        self.producer_loop(&tx).await;

        // Close the channel so executors drain and exit.
        drop(tx);

        let deadline = Instant::now() + self.cfg.shutdown_grace;
        let mut drained = true;
        for handle in executor_handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                drained = false;
                break;
            }
        }
        if drained {
            info!("all in-flight jobs completed");
        } else {
            warn!(
                grace_secs = self.cfg.shutdown_grace.as_secs(),
                "shutdown grace exceeded; abandoning in-flight executors"
            );
        }

        // Keep the process alive until the health server has served its
        // not_ready observation window.
        let health_cap = self.cfg.readiness_drain + Duration::from_secs(2);
        let _ = tokio::time::timeout(health_cap, health_handle).await;

        info!("worker stopped");
        Ok(())
    }

    async fn producer_loop(&self, tx: &mpsc::Sender<Job>) {
        'producer: loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("shutdown signal received; stopping claims");
                    break 'producer;
                }
                () = self.clock.sleep(self.cfg.poll_interval) => {
                    for _ in 0..self.cfg.concurrency {
                        let claimed = tokio::time::timeout(
                            self.cfg.claim_timeout,
                            self.queue.claim_next(&self.cfg.worker_id),
                        )
                        .await;

                        let job = match claimed {
                            Ok(Ok(Some(job))) => job,
                            // Queue drained for this tick.
                            Ok(Ok(None)) => break,
                            Ok(Err(err)) => {
                                warn!(error = %err, "claim failed");
                                break;
                            },
                            Err(_elapsed) => {
                                warn!("claim timed out");
                                break;
                            },
                        };

                        tokio::select! {
                            sent = tx.send(job) => {
                                if sent.is_err() {
                                    break 'producer;
                                }
                                self.metrics.inc_claimed();
                            }
                            () = self.shutdown.cancelled() => break 'producer,
                        }
                    }
                }
            }
        }
    }

    async fn spawn_health_server(&self) -> Result<tokio::task::JoinHandle<()>> {
        let listener = tokio::net::TcpListener::bind(self.cfg.health_addr).await.map_err(|e| {
            WorkerError::Runtime { message: format!("health server bind failed: {e}") }
        })?;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "worker health server starting");
        }

        let router = health_router(self.ready.clone());
        let ready = self.ready.clone();
        let token = self.shutdown.clone();
        let drain = self.cfg.readiness_drain;

        Ok(tokio::spawn(async move {
            let shutdown = async move {
                token.cancelled().await;
                *ready.write().expect("readiness lock poisoned") = false;
                // 503 observation window before the listener closes.
                tokio::time::sleep(drain).await;
            };

            if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await
            {
                error!(error = %err, "worker health server error");
            }
        }))
    }

    fn spawn_reclaimer(&self) {
        let queue = self.queue.clone();
        let clock = self.clock.clone();
        let token = self.shutdown.clone();
        let lock_ttl = self.cfg.lock_ttl;
        let interval = self.cfg.reclaim_interval;
        let op_timeout = self.cfg.claim_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = clock.sleep(interval) => {
                        match tokio::time::timeout(
                            op_timeout,
                            queue.requeue_stale_processing(lock_ttl),
                        )
                        .await
                        {
                            Ok(Ok(count)) if count > 0 => {
                                info!(count, "requeued stale processing jobs");
                            },
                            Ok(Ok(_)) => {},
                            Ok(Err(err)) => warn!(error = %err, "stale requeue failed"),
                            Err(_elapsed) => warn!("stale requeue timed out"),
                        }
                    }
                }
            }
        });
    }

    fn spawn_metrics_logger(&self) {
        let metrics = self.metrics.clone();
        let clock = self.clock.clone();
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = clock.sleep(METRICS_LOG_INTERVAL) => {
                        let s = metrics.snapshot();
                        info!(
                            claimed = s.claimed,
                            done = s.done,
                            failed = s.failed,
                            retried = s.retried,
                            dead_lettered = s.dead_lettered,
                            duration_avg_ms = s.duration_avg_ms,
                            duration_max_ms = s.duration_max_ms,
                            "job metrics"
                        );
                    }
                }
            }
        });
    }
}

struct Executor {
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    backoff: BackoffPolicy,
    metrics: Arc<JobMetrics>,
    worker_id: String,
}

impl Executor {
    async fn run(self: Arc<Self>, executor_num: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
        loop {
            // Holding the lock while waiting is intentional: only one
            // executor can receive at a time anyway, and a closed channel
            // wakes every waiter in turn.
            let job = { rx.lock().await.recv().await };
            let Some(job) = job else { break };

            self.process_job(executor_num, job).await;
        }
    }

    async fn process_job(&self, executor_num: usize, job: Job) {
        let span = info_span!(
            "job.run",
            job.id = %job.id,
            job.type = %job.job_type,
            job.attempts = job.attempts,
            job.max_attempts = job.max_attempts,
            worker.id = %self.worker_id,
            executor.num = executor_num,
            user.id = tracing::field::Empty,
        );
        if let Some(user_id) = job.user_id {
            span.record("user.id", tracing::field::display(user_id));
        }

        async {
            let start = Instant::now();
            info!("job.start");

            let result = self.dispatch(&job).await;
            let duration = start.elapsed();
            self.metrics.observe_duration(duration);

            match result {
                Ok(()) => self.complete(&job, duration).await,
                Err(err) => {
                    self.metrics.inc_failed();
                    error!(
                        error = %err,
                        duration_ms = duration.as_millis() as u64,
                        "job.error"
                    );
                    self.handle_failure(&job, &err).await;
                },
            }
        }
        .instrument(span)
        .await;
    }

    async fn dispatch(&self, job: &Job) -> Result<()> {
        let Some(handler) = self.registry.get(&job.job_type) else {
            return Err(WorkerError::UnknownJobType { job_type: job.job_type.clone() });
        };

        let ctx = JobContext::for_job(job);
        let payload = job.payload.clone();

        // Run the handler in its own task so a panic is contained and
        // classified instead of taking the executor down.
        let handle = tokio::spawn(
            async move { handler.execute(ctx, payload).await }
                .instrument(tracing::Span::current()),
        );

        match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let message = match join_err.into_panic().downcast::<String>() {
                    Ok(message) => *message,
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(message) => (*message).to_string(),
                        Err(_) => "unknown panic".to_string(),
                    },
                };
                Err(WorkerError::Panicked { message })
            },
            Err(_) => Err(WorkerError::Panicked { message: "handler task cancelled".into() }),
        }
    }

    async fn complete(&self, job: &Job, duration: Duration) {
        if let Err(err) = self.queue.mark_done(job.id).await {
            error!(error = %err, "job.mark_done_failed");
            self.metrics.inc_failed();
            let _ = self
                .queue
                .mark_failed(job.id, &format!("mark_done_failed: {err}"))
                .await;
            return;
        }

        self.metrics.inc_done();
        info!(duration_ms = duration.as_millis() as u64, "job.done");
    }

    async fn handle_failure(&self, job: &Job, err: &WorkerError) {
        let err_msg = err.to_string();

        if err.is_fatal() {
            if let Err(mark_err) = self.queue.mark_failed(job.id, &err_msg).await {
                error!(error = %mark_err, "mark failed errored");
                return;
            }
            self.metrics.inc_dead_lettered();
            error!(error = %err_msg, "job dead-lettered (non-retryable)");
            return;
        }

        let next_attempt = job.attempts + 1;
        if next_attempt < job.max_attempts {
            let delay = self.backoff.delay(job.attempts.max(0) as u32);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            if let Err(resched_err) = self.queue.reschedule(job.id, run_at, &err_msg).await {
                error!(error = %resched_err, "reschedule failed");
                let _ = self
                    .queue
                    .mark_failed(job.id, &format!("reschedule_failed: {err_msg}"))
                    .await;
                return;
            }

            self.metrics.inc_retried();
            warn!(
                attempt = next_attempt,
                max_attempts = job.max_attempts,
                next_run_at = %run_at,
                error = %err_msg,
                "job retry scheduled"
            );
            return;
        }

        if let Err(mark_err) = self.queue.mark_failed(job.id, &err_msg).await {
            error!(error = %mark_err, "mark failed errored");
            return;
        }

        self.metrics.inc_dead_lettered();
        error!(
            attempts = next_attempt,
            max_attempts = job.max_attempts,
            error = %err_msg,
            "job dead-lettered"
        );
    }
}
