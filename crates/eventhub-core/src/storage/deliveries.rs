//! Repository for the notification delivery ledger.
//!
//! The `(kind, registration_id)` unique row is the exactly-once
//! coordination point for user-visible sends. The queue guarantees
//! at-least-once execution; this table narrows that to at-most-once per
//! registration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{DeliveryRecord, JobId, RegistrationId, StartOutcome},
};

/// The only delivery kind the core ships today.
pub const KIND_REGISTRATION_CONFIRMATION: &str = "registration.confirmation";

/// Repository for delivery ledger operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Attempts to claim the confirmation send for a registration.
    ///
    /// Insert-if-absent wins the send outright. If a row already exists, a
    /// `failed` row is atomically flipped back to `sending` (only one
    /// worker can win that flip); a `sent` row is idempotent success; a
    /// `sending` row belongs to another attempt.
    ///
    /// # Errors
    ///
    /// Returns error if a statement fails.
    pub async fn try_start_registration(
        &self,
        job_id: JobId,
        registration_id: RegistrationId,
        recipient: &str,
    ) -> Result<StartOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO notification_deliveries
                (kind, registration_id, job_id, recipient, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'sending', NOW(), NOW())
            ON CONFLICT (kind, registration_id) DO NOTHING
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .bind(job_id)
        .bind(recipient)
        .execute(&*self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(StartOutcome::Started);
        }

        // Row exists. Claim a failed row back to sending; the status guard
        // makes the flip atomic, so only one worker wins the retry.
        let claimed = sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = 'sending',
                job_id = $3,
                recipient = $4,
                last_error = NULL,
                updated_at = NOW()
            WHERE kind = $1 AND registration_id = $2 AND status = 'failed'
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .bind(job_id)
        .bind(recipient)
        .execute(&*self.pool)
        .await?;

        if claimed.rows_affected() == 1 {
            return Ok(StartOutcome::RetryClaim);
        }

        // Not failed: classify sent vs in-flight.
        let row: Option<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT status, sent_at
            FROM notification_deliveries
            WHERE kind = $1 AND registration_id = $2
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            // Row disappeared between statements; let the caller retry.
            None => Ok(StartOutcome::Started),
            Some((status, sent_at)) => {
                if sent_at.is_some() || status == "sent" {
                    Ok(StartOutcome::AlreadySent)
                } else {
                    Ok(StartOutcome::InProgress)
                }
            },
        }
    }

    /// Marks the registration's confirmation as sent.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(
        &self,
        registration_id: RegistrationId,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = 'sent',
                sent_at = NOW(),
                provider_message_id = $3,
                last_error = NULL,
                updated_at = NOW()
            WHERE kind = $1 AND registration_id = $2
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .bind(provider_message_id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed send so a later job can claim the retry.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(&self, registration_id: RegistrationId, err_msg: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = 'failed',
                last_error = $3,
                updated_at = NOW()
            WHERE kind = $1 AND registration_id = $2
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .bind(err_msg)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the ledger row for a registration, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<DeliveryRecord>> {
        let record = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT kind, registration_id, job_id, recipient, status, sent_at,
                   provider_message_id, last_error, created_at, updated_at
            FROM notification_deliveries
            WHERE kind = $1 AND registration_id = $2
            "#,
        )
        .bind(KIND_REGISTRATION_CONFIRMATION)
        .bind(registration_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }
}
