//! Repository for the durable job queue.
//!
//! All queue transitions are single statements so the row-level lock is
//! released at statement end; no long-running transactions. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never block on, or
//! double-claim, the same row.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{Job, JobId, JobStatus, NewJob},
};

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, run_at, \
                           locked_at, locked_by, last_error, idempotency_key, priority, user_id, \
                           created_at, updated_at";

/// Hard cap on a single bulk reprocess of dead-lettered jobs.
const RETRY_MANY_MAX: i64 = 500;

/// Repository for job queue database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a new pending job.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdempotencyKey` if a row with the same non-null
    /// idempotency key already exists; callers may read it back via
    /// [`Repository::get_by_idempotency_key`].
    pub async fn enqueue(&self, req: NewJob) -> Result<Job> {
        self.enqueue_impl(&*self.pool, req).await
    }

    /// Inserts a new pending job inside a caller-supplied transaction.
    ///
    /// The insert uses `ON CONFLICT DO NOTHING` so an idempotency collision
    /// surfaces as an error without aborting the surrounding transaction;
    /// the caller can still commit its business write.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdempotencyKey` on key collision.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: NewJob,
    ) -> Result<Job> {
        self.enqueue_impl(&mut **tx, req).await
    }

    async fn enqueue_impl<'e, E>(&self, executor: E, req: NewJob) -> Result<Job>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let job = Job::from_request(req, Utc::now());

        let inserted: Option<JobId> = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, status, attempts, max_attempts, run_at,
                locked_at, locked_by, last_error, idempotency_key, priority, user_id,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15
            )
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .bind(job.locked_at)
        .bind(&job.locked_by)
        .bind(&job.last_error)
        .bind(&job.idempotency_key)
        .bind(job.priority)
        .bind(job.user_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_optional(executor)
        .await?;

        if inserted.is_none() {
            let key = job.idempotency_key.unwrap_or_default();
            return Err(CoreError::DuplicateIdempotencyKey { key });
        }

        Ok(job)
    }

    /// Atomically claims the next eligible job for `worker_id`.
    ///
    /// Picks the top row matching `status = 'pending' AND run_at <= now AND
    /// attempts < max_attempts` in `(priority DESC, run_at ASC, created_at
    /// ASC, id ASC)` order, flips it to `processing` and returns the
    /// post-update row. `SKIP LOCKED` guarantees two workers never claim
    /// the same row.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails; an empty queue is `Ok(None)`.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND run_at <= NOW()
                  AND attempts < max_attempts
                ORDER BY priority DESC, run_at ASC, created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE jobs
            SET status = 'processing',
                locked_at = NOW(),
                locked_by = $1,
                updated_at = NOW()
            WHERE id = (SELECT id FROM next)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(job)
    }

    /// Transitions a job to terminal `done`, clearing the lock fields.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn mark_done(&self, id: JobId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done',
                locked_at = NULL,
                locked_by = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    /// Transitions a job to terminal `failed` (dead letter).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn mark_failed(&self, id: JobId, err_msg: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                locked_at = NULL,
                locked_by = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(err_msg)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    /// Returns a processing job to `pending` for a later retry.
    ///
    /// Increments `attempts`, records the failure and clears the lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn reschedule(&self, id: JobId, run_at: DateTime<Utc>, err_msg: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = attempts + 1,
                run_at = $2,
                locked_at = NULL,
                locked_by = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(run_at)
        .bind(err_msg)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    /// Resets processing rows whose lock has outlived `lock_ttl`.
    ///
    /// The previous owner died; its visible failures already produced an
    /// explicit transition, so `attempts` stays untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn requeue_stale_processing(&self, lock_ttl: Duration) -> Result<u64> {
        let mut secs = lock_ttl.as_secs() as i64;
        if secs <= 0 {
            secs = 30;
        }

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND locked_at IS NOT NULL
              AND locked_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(secs)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Looks a job up by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row carries the key.
    pub async fn get_by_idempotency_key(&self, key: &str) -> Result<Job> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("job with idempotency key {key}")))
    }

    /// Looks a job up by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row matches.
    pub async fn get_by_id(&self, id: JobId) -> Result<Job> {
        sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))
    }

    /// Keyset-paginated admin listing, newest updates first.
    ///
    /// Fetches rows strictly older than the `(after_updated_at, after_id)`
    /// cursor tuple, sorted `updated_at DESC, id DESC`. Probes one row past
    /// `limit` to compute `has_more`; the caller derives the next cursor
    /// from the last returned item.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_cursor(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        after_updated_at: DateTime<Utc>,
        after_id: JobId,
    ) -> Result<(Vec<Job>, bool)> {
        let probe = limit + 1;

        let mut items = match status {
            Some(status) => {
                sqlx::query_as::<_, Job>(&format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE status = $1 AND (updated_at, id) < ($2, $3)
                    ORDER BY updated_at DESC, id DESC
                    LIMIT $4
                    "#
                ))
                .bind(status)
                .bind(after_updated_at)
                .bind(after_id)
                .bind(probe)
                .fetch_all(&*self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, Job>(&format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE (updated_at, id) < ($1, $2)
                    ORDER BY updated_at DESC, id DESC
                    LIMIT $3
                    "#
                ))
                .bind(after_updated_at)
                .bind(after_id)
                .bind(probe)
                .fetch_all(&*self.pool)
                .await?
            },
        };

        let has_more = items.len() as i64 > limit;
        if has_more {
            items.truncate(limit as usize);
        }

        Ok((items, has_more))
    }

    /// Admin retry: requeues a single dead-lettered job.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the job does not exist and `NotFailed` if it is
    /// in any state other than `failed`.
    pub async fn retry(&self, id: JobId) -> Result<()> {
        let status: Option<JobStatus> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await?;

        match status {
            None => return Err(CoreError::NotFound(format!("job {id}"))),
            Some(JobStatus::Failed) => {},
            Some(_) => return Err(CoreError::NotFailed { id }),
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                run_at = NOW(),
                locked_at = NULL,
                locked_by = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Admin bulk retry: requeues up to `limit` dead-lettered jobs.
    ///
    /// `limit <= 0` falls back to 50; the cap is 500.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn retry_many_failed(&self, limit: i64) -> Result<u64> {
        let limit = if limit <= 0 { 50 } else { limit.min(RETRY_MANY_MAX) };

        let result = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM jobs
                WHERE status = 'failed'
                ORDER BY updated_at DESC
                LIMIT $1
            )
            UPDATE jobs
            SET status = 'pending',
                run_at = NOW(),
                locked_at = NULL,
                locked_by = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM picked)
            "#,
        )
        .bind(limit)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
