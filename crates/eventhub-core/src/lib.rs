//! Core domain models and storage for the EventHub job pipeline.
//!
//! Provides strongly-typed domain primitives, the durable job and delivery
//! ledger models, and the Postgres repository layer shared by the HTTP API
//! and the queue worker. All other crates depend on these foundational
//! types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod jobs;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryRecord, DeliveryStatus, Event, EventId, EventStatus, Job, JobId, JobStatus, NewJob,
    NewRegistration, Registration, RegistrationId, StartOutcome,
};
pub use time::{Clock, RealClock};

/// Default `max_attempts` applied when an enqueue request leaves it unset.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 25;
