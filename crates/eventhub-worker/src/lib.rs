//! Queue worker runtime for EventHub.
//!
//! Polls the durable `jobs` table, dispatches claimed rows to typed
//! handlers, and owns every deferred side effect of the API: registration
//! confirmations gated by the delivery ledger, and idempotent event
//! publishing.
//!
//! # Runtime shape
//!
//! ```text
//!                 ┌──────────────────────────────────────┐
//!                 │               PostgreSQL             │
//!                 │   jobs table, FOR UPDATE SKIP LOCKED │
//!                 └──────────────────────────────────────┘
//!                    ▲  claim              ▲  requeue stale
//!                    │                     │
//!              ┌───────────┐         ┌────────────┐
//!              │ producer  │         │ reclaimer  │
//!              └───────────┘         └────────────┘
//!                    │ bounded channel (capacity 1)
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!  ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │ executor │ │ executor │ │ executor │   N = concurrency
//!  └──────────┘ └──────────┘ └──────────┘
//!        │ per-type dispatch
//!        ▼
//!  handler registry ── ledger gate ── protected notifier
//! ```
//!
//! The queue delivers at-least-once; the notification delivery ledger
//! narrows the user-visible effect to at-most-once per registration.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod circuit;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod notifier;
pub mod storage;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use circuit::{CircuitConfig, CircuitState, ProtectedNotifier};
pub use error::{Result, WorkerError};
pub use handlers::{
    HandlerRegistry, JobContext, JobHandler, PublishEventHandler, RegistrationConfirmationHandler,
};
pub use metrics::{JobMetrics, MetricsSnapshot};
pub use notifier::{ConfirmationRequest, LogNotifier, Notifier};
pub use storage::{DeliveryLedger, EventPublisher, JobQueue};
pub use worker::{Worker, WorkerConfig};
