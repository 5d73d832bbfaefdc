//! Repository for the registrations collaborator.
//!
//! Creation participates in a caller-supplied transaction so the
//! registration insert and the confirmation job enqueue commit together.
//! The capacity check serializes on a `FOR UPDATE` lock of the event row.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{EventId, NewRegistration, Registration, RegistrationId},
};

const REGISTRATION_COLUMNS: &str =
    "id, event_id, user_id, name, email, created_at, updated_at";

/// Repository for registration database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a registration inside a caller-supplied transaction.
    ///
    /// Takes a `FOR UPDATE` row lock on the event so concurrent
    /// registrations for the same event serialize their capacity checks.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` for a duplicate email on the event,
    /// `EventFull` when capacity is reached, and `NotFound` for an unknown
    /// event.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: NewRegistration,
    ) -> Result<Registration> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM registrations
                WHERE event_id = $1 AND email = $2
            )
            "#,
        )
        .bind(req.event_id)
        .bind(&req.email)
        .fetch_one(&mut **tx)
        .await?;

        if exists {
            return Err(CoreError::AlreadyRegistered);
        }

        let capacity_row: Option<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT e.capacity,
                   (SELECT COUNT(*) FROM registrations r WHERE r.event_id = e.id) AS current
            FROM events e
            WHERE e.id = $1
            FOR UPDATE
            "#,
        )
        .bind(req.event_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (capacity, current) = match capacity_row {
            Some(row) => row,
            None => return Err(CoreError::NotFound(format!("event {}", req.event_id))),
        };

        if current >= i64::from(capacity) {
            return Err(CoreError::EventFull);
        }

        let now = Utc::now();
        let registration = Registration {
            id: RegistrationId::new(),
            event_id: req.event_id,
            user_id: req.user_id,
            name: req.name,
            email: req.email,
            created_at: now,
            updated_at: now,
        };

        let insert = sqlx::query(
            r#"
            INSERT INTO registrations (id, event_id, user_id, name, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(registration.id)
        .bind(registration.event_id)
        .bind(registration.user_id)
        .bind(&registration.name)
        .bind(&registration.email)
        .bind(registration.created_at)
        .bind(registration.updated_at)
        .execute(&mut **tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert {
            if db_err.is_unique_violation() {
                return Err(CoreError::AlreadyRegistered);
            }
        }
        insert?;

        Ok(registration)
    }

    /// Looks a registration up by event and registration ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn find_by_id(&self, event_id: EventId, id: RegistrationId) -> Result<Registration> {
        sqlx::query_as::<_, Registration>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE event_id = $1 AND id = $2"
        ))
        .bind(event_id)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("registration {id}")))
    }

    /// Counts registrations for an event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_for_event(&self, event_id: EventId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM registrations WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}
