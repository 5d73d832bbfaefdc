//! Scripted notifiers for pipeline tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use eventhub_worker::{ConfirmationRequest, Notifier, WorkerError};

/// Notifier that fails its first `fail_first` sends, then succeeds.
///
/// Every call that actually reaches the provider is counted and recorded;
/// circuit-breaker fast-fails never show up here, which is exactly what
/// tests assert on.
#[derive(Default)]
pub struct FlakyNotifier {
    fail_first: usize,
    calls: AtomicUsize,
    accepted: Mutex<Vec<ConfirmationRequest>>,
}

impl FlakyNotifier {
    /// A notifier that always succeeds.
    pub fn reliable() -> Self {
        Self::failing_first(0)
    }

    /// A notifier whose first `fail_first` sends fail.
    pub fn failing_first(fail_first: usize) -> Self {
        Self { fail_first, calls: AtomicUsize::new(0), accepted: Mutex::new(Vec::new()) }
    }

    /// Total sends that reached the provider, failed or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests the provider accepted, in order.
    pub fn accepted(&self) -> Vec<ConfirmationRequest> {
        self.accepted.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl Notifier for FlakyNotifier {
    async fn send_registration_confirmation(
        &self,
        input: &ConfirmationRequest,
    ) -> Result<(), WorkerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(WorkerError::Provider { message: "provider down (scripted)".into() });
        }

        self.accepted.lock().expect("notifier lock poisoned").push(input.clone());
        Ok(())
    }
}
