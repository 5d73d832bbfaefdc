//! Admin surface over the job queue.
//!
//! Listing uses keyset pagination over `(updated_at DESC, id DESC)`;
//! offsets do not survive a queue that rewrites rows on every retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use eventhub_core::{JobId, JobStatus};

use crate::{cursor::JobCursor, error::ApiError, AppState};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Query parameters for `GET /admin/jobs`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Optional status filter: pending|processing|done|failed.
    pub status: Option<String>,

    /// Page size, 1..=200, default 50.
    pub limit: Option<i64>,

    /// Opaque keyset cursor from a previous page.
    pub cursor: Option<String>,
}

/// Query parameters for `POST /admin/jobs/reprocess-dead`.
#[derive(Debug, Deserialize)]
pub struct ReprocessQuery {
    /// Upper bound on requeued jobs, default 50, capped server-side.
    pub limit: Option<i64>,
}

/// `GET /admin/jobs`: keyset-paginated listing.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request("invalid_query", "limit must be between 1 and 200"));
    }

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(|_| {
            ApiError::bad_request(
                "invalid_query",
                "status must be one of pending|processing|done|failed",
            )
        })?),
    };

    let (after_updated_at, after_id) = match query.cursor.as_deref() {
        None => (DateTime::<Utc>::MAX_UTC, JobId(Uuid::max())),
        Some(raw) => {
            let cursor = JobCursor::decode(raw)
                .ok_or_else(|| ApiError::bad_request("invalid_query", "cursor is invalid"))?;
            (cursor.updated_at, cursor.id)
        },
    };

    let (items, has_more) =
        state.storage.jobs.list_cursor(status, limit, after_updated_at, after_id).await?;

    let next_cursor = if has_more {
        items.last().map(|last| {
            JobCursor { updated_at: last.updated_at, id: last.id }.encode()
        })
    } else {
        None
    };

    Ok(Json(json!({
        "limit": limit,
        "count": items.len(),
        "items": items,
        "hasMore": has_more,
        "nextCursor": next_cursor,
    })))
}

/// `GET /admin/jobs/{id}`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.storage.jobs.get_by_id(JobId(id)).await?;
    Ok(Json(job))
}

/// `POST /admin/jobs/{id}/retry`: requeue a single dead-lettered job.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.jobs.retry(JobId(id)).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "jobId": JobId(id),
            "status": "pending",
        })),
    ))
}

/// `POST /admin/jobs/reprocess-dead?limit=N`: bulk requeue.
pub async fn reprocess_dead(
    State(state): State<AppState>,
    Query(query): Query<ReprocessQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 0 {
        return Err(ApiError::bad_request("invalid_query", "limit must be >= 0"));
    }

    let requeued = state.storage.jobs.retry_many_failed(limit).await?;
    Ok(Json(json!({ "requeued": requeued })))
}
