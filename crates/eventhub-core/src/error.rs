//! Error taxonomy for storage and domain operations.
//!
//! Kinds, not transport codes: callers match on the variant to decide
//! whether a failure is a missing row, a benign idempotency collision, or
//! something worth surfacing as a 5xx.

use thiserror::Error;

use crate::models::JobId;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and domain operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// No row matches the requested identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// Enqueue collided with an existing idempotency key.
    ///
    /// The caller may recover the existing job via
    /// `get_by_idempotency_key`; transactional enqueuers treat this as a
    /// benign no-op.
    #[error("duplicate idempotency key: {key}")]
    DuplicateIdempotencyKey {
        /// The colliding key.
        key: String,
    },

    /// Admin retry applied to a job that is not in the `failed` state.
    #[error("job {id} is not failed")]
    NotFailed {
        /// The job the retry was attempted on.
        id: JobId,
    },

    /// The email is already registered for this event.
    #[error("email already registered for this event")]
    AlreadyRegistered,

    /// The event has reached its registration capacity.
    #[error("event is at full capacity")]
    EventFull,

    /// A database constraint rejected the write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}
