//! Publish pipeline entry point.
//!
//! `POST /events/{id}/publish` enqueues an `event.publish` job instead of
//! publishing inline; the worker performs the flip. The idempotency key
//! makes the endpoint a put-if-absent: a repeat request answers 202 with
//! the existing job and `alreadyEnqueued: true`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use eventhub_core::{
    jobs::{event_publish_key, EventPublishPayload, TYPE_EVENT_PUBLISH},
    CoreError, EventId, NewJob,
};

use crate::{
    error::ApiError,
    handlers::{request_id_from, require_actor},
    AppState,
};

/// Attempt budget for publish jobs.
const PUBLISH_MAX_ATTEMPTS: i32 = 25;

/// Query parameters for `POST /events/{id}/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    /// Optional RFC 3339 schedule; defaults to now.
    #[serde(rename = "runAt")]
    pub run_at: Option<String>,
}

/// Enqueues the publish job for an event.
pub async fn publish_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<PublishQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = require_actor(&headers)?;
    let now = state.clock.now_utc();

    let run_at = match query.run_at.as_deref() {
        None => now,
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| {
                ApiError::bad_request("invalid_query", "runAt must be an RFC 3339 datetime")
            })?;
            let run_at = parsed.with_timezone(&Utc);

            // Allow slight clock drift but reject clearly-in-the-past
            // schedules.
            if run_at < now - Duration::seconds(30) {
                return Err(ApiError::bad_request(
                    "invalid_query",
                    "runAt must be now or in the future",
                ));
            }
            run_at
        },
    };

    let request_id = request_id_from(&headers);
    let payload = EventPublishPayload {
        event_id: EventId(event_id),
        requested_by: Some(actor_id),
        requested_at: now,
        request_id: request_id.clone(),
    };

    let key = event_publish_key(EventId(event_id));
    let request = NewJob {
        job_type: TYPE_EVENT_PUBLISH.into(),
        payload: serde_json::to_value(&payload)
            .map_err(|err| ApiError::internal(format!("payload encoding failed: {err}")))?,
        run_at: Some(run_at),
        max_attempts: PUBLISH_MAX_ATTEMPTS,
        idempotency_key: Some(key.clone()),
        priority: 0,
        user_id: Some(actor_id),
    };

    let job = match state.storage.jobs.enqueue(request).await {
        Ok(job) => job,
        Err(CoreError::DuplicateIdempotencyKey { .. }) => {
            let existing = state.storage.jobs.get_by_idempotency_key(&key).await?;

            info!(
                request_id = request_id.unwrap_or_default(),
                job_id = %existing.id,
                job_type = %existing.job_type,
                already_enqueued = true,
                "job.enqueue"
            );
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "jobId": existing.id,
                    "status": existing.status,
                    "type": existing.job_type,
                    "alreadyEnqueued": true,
                })),
            ));
        },
        Err(err) => return Err(err.into()),
    };

    info!(
        request_id = request_id.unwrap_or_default(),
        job_id = %job.id,
        job_type = %job.job_type,
        already_enqueued = false,
        "job.enqueue"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": job.id,
            "status": job.status,
            "type": job.job_type,
        })),
    ))
}
