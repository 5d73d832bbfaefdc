//! Notifier seam for registration confirmations.
//!
//! The worker only ever talks to [`Notifier`]; whether the implementation
//! logs, speaks SMTP or calls a SaaS is invisible to the pipeline. The
//! production composition wraps whichever implementation is configured in
//! the circuit-breaker protection of [`crate::circuit::ProtectedNotifier`].

use async_trait::async_trait;
use tracing::info;

use eventhub_core::{EventId, RegistrationId};

use crate::error::{Result, WorkerError};

/// Everything a confirmation send needs to know.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Destination address.
    pub email: String,

    /// Attendee name.
    pub name: String,

    /// Event registered for.
    pub event_id: EventId,

    /// Registration the confirmation belongs to.
    pub registration_id: RegistrationId,
}

/// Sends registration confirmations.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one confirmation. Implementations must stay within the
    /// caller's timeout expectations; the protected wrapper enforces a hard
    /// per-call deadline regardless.
    async fn send_registration_confirmation(&self, input: &ConfirmationRequest) -> Result<()>;
}

/// Notifier that logs instead of sending.
///
/// The default in development. Two environment knobs exist for poking at
/// the failure paths by hand: `NOTIFIER_SLEEP_MS` delays the send,
/// `NOTIFIER_FAIL=1` makes every send fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Creates a new log notifier.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_registration_confirmation(&self, input: &ConfirmationRequest) -> Result<()> {
        if let Ok(ms) = std::env::var("NOTIFIER_SLEEP_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            }
        }

        if std::env::var("NOTIFIER_FAIL").as_deref() == Ok("1") {
            return Err(WorkerError::Provider { message: "provider down (simulated)".into() });
        }

        info!(
            email = %input.email,
            name = %input.name,
            event_id = %input.event_id,
            registration_id = %input.registration_id,
            "notification.registration_confirmation"
        );
        Ok(())
    }
}
