//! API health probes.
//!
//! `/healthz` is pure liveness. `/readyz` runs the storage health check,
//! so a database outage flips the probe to 503 and load balancers stop
//! routing traffic here.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::AppState;

/// Liveness: the process is up and serving.
pub async fn healthz() -> Response {
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

/// Readiness: the database answers.
pub async fn readyz(State(state): State<AppState>) -> Response {
    match state.storage.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(err) => {
            error!(error = %err, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not_ready" })))
                .into_response()
        },
    }
}
