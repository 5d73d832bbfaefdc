//! Error types for job execution.
//!
//! The executor looks at one thing only: [`WorkerError::is_fatal`]. Fatal
//! errors dead-letter immediately; everything else retries until the
//! attempt budget runs out, `CircuitOpen` included (backoff gives the
//! breaker its cooldown for free).

use thiserror::Error;

use eventhub_core::{CoreError, RegistrationId};

/// Result type alias for handler and runtime operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced by handlers, the notifier stack and the runtime.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The notifier circuit breaker is open; the send fast-failed without
    /// reaching the provider.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// The underlying send exceeded the per-call timeout.
    #[error("notifier timed out after {timeout_ms}ms")]
    NotifierTimeout {
        /// Configured per-call timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The notification provider rejected or failed the send.
    #[error("notification provider failed: {message}")]
    Provider {
        /// Provider error message.
        message: String,
    },

    /// Another attempt currently owns the ledger claim for this
    /// registration; retry later.
    #[error("confirmation send in progress for registration {registration_id}")]
    DeliveryInProgress {
        /// Registration whose send is claimed elsewhere.
        registration_id: RegistrationId,
    },

    /// The payload is well-formed JSON but does not decode into the shape
    /// the handler expects.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Decode error message.
        message: String,
    },

    /// No handler is registered for the job's type string.
    #[error("unknown job type: {job_type}")]
    UnknownJobType {
        /// The unclassifiable type string.
        job_type: String,
    },

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The handler panicked; recovered by the executor.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Recovered panic message.
        message: String,
    },

    /// Runtime-level failure outside any single job, e.g. the health
    /// server failing to bind.
    #[error("worker runtime error: {message}")]
    Runtime {
        /// What went wrong.
        message: String,
    },
}

impl WorkerError {
    /// Whether the job should dead-letter without consuming its remaining
    /// attempts.
    ///
    /// Malformed payloads and unknown types cannot succeed on retry;
    /// rescheduling them only burns attempts and log volume.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidPayload { .. } | Self::UnknownJobType { .. })
    }
}

impl From<CoreError> for WorkerError {
    fn from(err: CoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unclassifiable_errors_are_fatal() {
        assert!(WorkerError::InvalidPayload { message: "missing eventId".into() }.is_fatal());
        assert!(WorkerError::UnknownJobType { job_type: "test.crash".into() }.is_fatal());

        assert!(!WorkerError::CircuitOpen.is_fatal());
        assert!(!WorkerError::NotifierTimeout { timeout_ms: 2000 }.is_fatal());
        assert!(!WorkerError::Provider { message: "smtp 451".into() }.is_fatal());
        assert!(!WorkerError::Storage("connection reset".into()).is_fatal());
        assert!(!WorkerError::Panicked { message: "boom".into() }.is_fatal());
    }
}
