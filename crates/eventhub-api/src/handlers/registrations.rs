//! Registration creation with the transactional confirmation enqueue.
//!
//! The correctness anchor of the pipeline: the confirmation job must exist
//! iff the registration row commits, so both writes share one transaction
//! and one commit. A duplicate idempotency key inside the transaction is a
//! benign no-op, never an error to the caller.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use eventhub_core::{
    jobs::{
        registration_confirmation_key, RegistrationConfirmationPayload,
        TYPE_REGISTRATION_CONFIRMATION,
    },
    CoreError, EventId, NewJob, NewRegistration,
};

use crate::{
    error::ApiError,
    handlers::{request_id_from, require_actor},
    AppState,
};

/// Attempt budget for confirmation sends.
const CONFIRMATION_MAX_ATTEMPTS: i32 = 10;

/// Request body for `POST /events/{id}/registrations`.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    /// Attendee name.
    pub name: String,

    /// Attendee email.
    pub email: String,
}

/// Creates a registration and enqueues its confirmation atomically.
pub async fn register(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = require_actor(&headers)?;

    let name = body.name.trim();
    let email = body.email.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "name must not be empty"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("invalid_request", "email must be a valid address"));
    }

    let mut tx = state.storage.begin().await?;

    let registration = state
        .storage
        .registrations
        .create_in_tx(
            &mut tx,
            NewRegistration {
                event_id: EventId(event_id),
                user_id: actor_id,
                name: name.to_string(),
                email: email.to_string(),
            },
        )
        .await?;

    let payload = RegistrationConfirmationPayload {
        registration_id: registration.id,
        event_id: registration.event_id,
        email: registration.email.clone(),
        name: registration.name.clone(),
        requested_at: state.clock.now_utc(),
        request_id: request_id_from(&headers),
    };

    let request = NewJob {
        job_type: TYPE_REGISTRATION_CONFIRMATION.into(),
        payload: serde_json::to_value(&payload)
            .map_err(|err| ApiError::internal(format!("payload encoding failed: {err}")))?,
        run_at: None,
        max_attempts: CONFIRMATION_MAX_ATTEMPTS,
        idempotency_key: Some(registration_confirmation_key(registration.id)),
        priority: 0,
        user_id: Some(actor_id),
    };

    let enqueued = match state.storage.jobs.enqueue_in_tx(&mut tx, request).await {
        Ok(job) => Some(job),
        // Another request already enqueued this registration's
        // confirmation; the commit still has to go through.
        Err(CoreError::DuplicateIdempotencyKey { .. }) => None,
        Err(err) => return Err(err.into()),
    };

    tx.commit()
        .await
        .map_err(|err| ApiError::internal(format!("commit failed: {err}")))?;

    if let Some(job) = &enqueued {
        info!(
            request_id = request_id_from(&headers).unwrap_or_default(),
            job_id = %job.id,
            job_type = %job.job_type,
            already_enqueued = false,
            "job.enqueue"
        );
    }

    Ok((StatusCode::CREATED, Json(registration)))
}
