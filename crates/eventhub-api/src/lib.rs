//! HTTP API for EventHub.
//!
//! Registrations (with the transactional confirmation enqueue), the event
//! publish pipeline entry point, the admin jobs surface, and health
//! probes. Authentication, CORS and rate limiting are external
//! collaborators; the API trusts the `X-Actor-Id` header its middleware
//! stack is expected to populate.

#![forbid(unsafe_code)]

use std::sync::Arc;

use eventhub_core::{storage::Storage, Clock};

pub mod config;
pub mod cursor;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Repository layer.
    pub storage: Arc<Storage>,

    /// Injected clock, so handlers stay testable.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates the shared state.
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}
