//! Repository for the events collaborator.
//!
//! The queue core needs two things from events: the capacity row lock used
//! by registration creation (taken in `registrations`), and the idempotent
//! publish flip consumed by the `event.publish` handler.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Event, EventId},
};

const EVENT_COLUMNS: &str = "id, title, capacity, status, published_at, created_at, updated_at";

/// Repository for event database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts an event row.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, title, capacity, status, published_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(event.capacity)
        .bind(event.status)
        .bind(event.published_at)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Looks an event up by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn find_by_id(&self, id: EventId) -> Result<Event> {
        sqlx::query_as::<_, Event>(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {id}")))
    }

    /// Flips an event to published.
    ///
    /// Idempotent: returns `true` only for the transition that actually
    /// changed the row. An already-published or missing event yields
    /// `false`, which callers treat as a success no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_published(&self, id: EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = 'published',
                published_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status <> 'published'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
