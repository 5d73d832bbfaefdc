//! Idempotent schema setup.
//!
//! Both binaries run this on boot; every statement is `IF NOT EXISTS` so a
//! restart against an existing database is a no-op.

use sqlx::PgPool;

use crate::error::Result;

/// Creates the tables and indexes the pipeline depends on.
///
/// # Errors
///
/// Returns error if any DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            published_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registrations (
            id UUID PRIMARY KEY,
            event_id UUID NOT NULL REFERENCES events(id),
            user_id UUID NOT NULL,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT registrations_event_email_uniq UNIQUE (event_id, email)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            job_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            run_at TIMESTAMPTZ NOT NULL,
            locked_at TIMESTAMPTZ,
            locked_by TEXT,
            last_error TEXT,
            idempotency_key TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            user_id UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS jobs_idempotency_key_uniq
        ON jobs (idempotency_key)
        WHERE idempotency_key IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    // Claim path: eligible pending rows in claim order.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS jobs_claim_idx
        ON jobs (priority DESC, run_at ASC, created_at ASC)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;

    // Admin listing: keyset pagination per status.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS jobs_admin_list_idx
        ON jobs (status, updated_at DESC, id DESC)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_deliveries (
            kind TEXT NOT NULL,
            registration_id UUID NOT NULL,
            job_id UUID NOT NULL,
            recipient TEXT NOT NULL,
            status TEXT NOT NULL,
            sent_at TIMESTAMPTZ,
            provider_message_id TEXT,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT notification_deliveries_kind_registration_uniq
                UNIQUE (kind, registration_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
