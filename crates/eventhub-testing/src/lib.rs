//! Test infrastructure for deterministic pipeline testing.
//!
//! Provides in-memory implementations of the worker's collaborator traits
//! and scripted notifiers, so the full runtime (producer, executors,
//! reclaimer, shutdown) can be exercised without a database or a provider.
//! The stores keep a transition log for asserting retry and fast-fail
//! behavior that terminal states alone cannot show.

#![forbid(unsafe_code)]

pub mod memory;
pub mod notifier;

pub use memory::{MemoryEvents, MemoryJobStore, MemoryLedger};
pub use notifier::FlakyNotifier;
