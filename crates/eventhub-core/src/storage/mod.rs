//! Postgres repository layer.
//!
//! The repositories are the only place SQL lives; domain logic never builds
//! queries. All repositories share one connection pool, and every operation
//! borrows a connection for its duration only. Transactional paths accept a
//! caller-supplied [`sqlx::Transaction`] so a business write and its job
//! enqueue commit or roll back together.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

pub mod deliveries;
pub mod events;
pub mod jobs;
pub mod registrations;
pub mod schema;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Durable job queue operations.
    pub jobs: Arc<jobs::Repository>,

    /// Notification delivery ledger.
    pub deliveries: Arc<deliveries::Repository>,

    /// Events collaborator (capacity, publish flip).
    pub events: Arc<events::Repository>,

    /// Registrations collaborator.
    pub registrations: Arc<registrations::Repository>,

    pool: PgPool,
}

impl Storage {
    /// Creates a new storage instance over a shared connection pool.
    pub fn new(pool: PgPool) -> Self {
        let shared = Arc::new(pool.clone());

        Self {
            jobs: Arc::new(jobs::Repository::new(shared.clone())),
            deliveries: Arc::new(deliveries::Repository::new(shared.clone())),
            events: Arc::new(events::Repository::new(shared.clone())),
            registrations: Arc::new(registrations::Repository::new(shared)),
            pool,
        }
    }

    /// Begins a transaction for multi-repository writes.
    ///
    /// # Errors
    ///
    /// Returns error if a connection cannot be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Verifies database connectivity with a lightweight query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        // Construction only; database behavior is covered by integration
        // tests that require a live Postgres.
        let pool = PgPool::connect_lazy("postgresql://localhost/eventhub").unwrap();
        let _storage = Storage::new(pool);
    }
}
