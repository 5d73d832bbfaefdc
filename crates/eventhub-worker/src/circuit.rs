//! Circuit-breaker protection for the notifier.
//!
//! Tracks consecutive failures of the underlying notifier and fast-fails
//! while the provider is down, so workers spend their attempts on backoff
//! instead of hammering a dead dependency.
//!
//! ```text
//! closed ──(threshold consecutive failures)──▶ open
//! open ──(cooldown elapsed)──▶ half_open
//! half_open ──(trial success)──▶ closed
//! half_open ──(trial failure)──▶ open
//! ```
//!
//! State lives behind one mutex. The lock is taken twice per call, before
//! and after the send, and is never held across the send itself.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::{Result, WorkerError},
    notifier::{ConfirmationRequest, Notifier},
};

/// Circuit breaker and timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Hard per-call timeout on the underlying send.
    pub timeout: Duration,

    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long to stay open before probing with trial calls.
    pub cooldown: Duration,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            failure_threshold: 3,
            cooldown: Duration::from_secs(15),
            half_open_max_calls: 1,
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; every call goes through.
    Closed,

    /// Fast-fail; no call reaches the underlying notifier.
    Open,

    /// Limited trial calls probe whether the provider recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Notifier wrapper that fail-fasts while the provider is down.
pub struct ProtectedNotifier {
    inner: Arc<dyn Notifier>,
    cfg: CircuitConfig,
    state: Mutex<BreakerState>,
}

impl ProtectedNotifier {
    /// Wraps `inner` with breaker protection and a per-call timeout.
    pub fn new(inner: Arc<dyn Notifier>, cfg: CircuitConfig) -> Self {
        Self {
            inner,
            cfg,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    /// Current breaker position, for logs and tests.
    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("breaker mutex poisoned").state
    }

    fn allow_request(&self) -> bool {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = guard
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.cfg.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!("notifier breaker half-open, admitting trial call");
                    guard.state = CircuitState::HalfOpen;
                    guard.half_open_in_flight = 1;
                    return true;
                }
                false
            },
            CircuitState::HalfOpen => {
                if guard.half_open_in_flight >= self.cfg.half_open_max_calls {
                    return false;
                }
                guard.half_open_in_flight += 1;
                true
            },
        }
    }

    fn after_request(&self, succeeded: bool) {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");

        if guard.state == CircuitState::HalfOpen && guard.half_open_in_flight > 0 {
            guard.half_open_in_flight -= 1;
        }

        if succeeded {
            guard.consecutive_failures = 0;
            guard.state = CircuitState::Closed;
            return;
        }

        guard.consecutive_failures += 1;

        // A failed trial reopens immediately.
        if guard.state == CircuitState::HalfOpen {
            warn!("notifier breaker trial call failed, reopening");
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
            return;
        }

        if guard.consecutive_failures >= self.cfg.failure_threshold {
            warn!(
                consecutive_failures = guard.consecutive_failures,
                "notifier breaker opening"
            );
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl Notifier for ProtectedNotifier {
    async fn send_registration_confirmation(&self, input: &ConfirmationRequest) -> Result<()> {
        if !self.allow_request() {
            return Err(WorkerError::CircuitOpen);
        }

        let result =
            match tokio::time::timeout(self.cfg.timeout, self.inner.send_registration_confirmation(input))
                .await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(WorkerError::NotifierTimeout {
                    timeout_ms: self.cfg.timeout.as_millis() as u64,
                }),
            };

        self.after_request(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use eventhub_core::{EventId, RegistrationId};

    use super::*;

    struct ScriptedNotifier {
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedNotifier {
        fn new(failing: bool) -> Arc<Self> {
            Arc::new(Self { failing: AtomicBool::new(failing), calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send_registration_confirmation(&self, _: &ConfirmationRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(WorkerError::Provider { message: "provider down".into() })
            } else {
                Ok(())
            }
        }
    }

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            email: "u@example.com".into(),
            name: "Ada".into(),
            event_id: EventId::new(),
            registration_id: RegistrationId::new(),
        }
    }

    fn config(cooldown: Duration) -> CircuitConfig {
        CircuitConfig {
            timeout: Duration::from_millis(200),
            failure_threshold: 3,
            cooldown,
            half_open_max_calls: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fast_fails_without_inner_calls() {
        let inner = ScriptedNotifier::new(true);
        let protected =
            ProtectedNotifier::new(inner.clone(), config(Duration::from_secs(60)));

        for _ in 0..3 {
            let err = protected.send_registration_confirmation(&request()).await.unwrap_err();
            assert!(matches!(err, WorkerError::Provider { .. }));
        }
        assert_eq!(protected.state(), CircuitState::Open);
        assert_eq!(inner.calls(), 3);

        // Open: fast-fail, inner untouched.
        for _ in 0..5 {
            let err = protected.send_registration_confirmation(&request()).await.unwrap_err();
            assert!(matches!(err, WorkerError::CircuitOpen));
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn cooldown_admits_one_trial_and_success_closes() {
        let inner = ScriptedNotifier::new(true);
        let protected =
            ProtectedNotifier::new(inner.clone(), config(Duration::from_millis(50)));

        for _ in 0..3 {
            let _ = protected.send_registration_confirmation(&request()).await;
        }
        assert_eq!(protected.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        inner.set_failing(false);

        protected.send_registration_confirmation(&request()).await.unwrap();
        assert_eq!(protected.state(), CircuitState::Closed);
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test]
    async fn failed_trial_reopens_the_circuit() {
        let inner = ScriptedNotifier::new(true);
        let protected =
            ProtectedNotifier::new(inner.clone(), config(Duration::from_millis(50)));

        for _ in 0..3 {
            let _ = protected.send_registration_confirmation(&request()).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let err = protected.send_registration_confirmation(&request()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Provider { .. }));
        assert_eq!(protected.state(), CircuitState::Open);

        // Straight back to fast-fail.
        let err = protected.send_registration_confirmation(&request()).await.unwrap_err();
        assert!(matches!(err, WorkerError::CircuitOpen));
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let inner = ScriptedNotifier::new(true);
        let protected =
            ProtectedNotifier::new(inner.clone(), config(Duration::from_secs(60)));

        let _ = protected.send_registration_confirmation(&request()).await;
        let _ = protected.send_registration_confirmation(&request()).await;

        inner.set_failing(false);
        protected.send_registration_confirmation(&request()).await.unwrap();

        // Two more failures must not reach the threshold of three.
        inner.set_failing(true);
        let _ = protected.send_registration_confirmation(&request()).await;
        let _ = protected.send_registration_confirmation(&request()).await;
        assert_eq!(protected.state(), CircuitState::Closed);
    }

    struct SlowNotifier;

    #[async_trait]
    impl Notifier for SlowNotifier {
        async fn send_registration_confirmation(&self, _: &ConfirmationRequest) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_sends_hit_the_per_call_timeout() {
        let protected = ProtectedNotifier::new(
            Arc::new(SlowNotifier),
            CircuitConfig { timeout: Duration::from_millis(20), ..config(Duration::from_secs(60)) },
        );

        let err = protected.send_registration_confirmation(&request()).await.unwrap_err();
        assert!(matches!(err, WorkerError::NotifierTimeout { .. }));
    }
}
