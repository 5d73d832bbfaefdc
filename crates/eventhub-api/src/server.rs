//! HTTP server assembly and lifecycle.
//!
//! Requests flow through request-id injection, tracing and the timeout
//! layer before reaching handlers. Shutdown is graceful on SIGINT and
//! SIGTERM: stop accepting, drain in-flight requests, return.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use eventhub_core::{storage::Storage, Clock, RealClock};

use crate::{config::Config, handlers, AppState};

/// Builds the router with all routes and middleware.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let health_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz));

    let api_routes = Router::new()
        .route("/events/{id}/registrations", post(handlers::register))
        .route("/events/{id}/publish", post(handlers::publish_event));

    let admin_routes = Router::new()
        .route("/admin/jobs", get(handlers::list_jobs))
        .route("/admin/jobs/{id}", get(handlers::get_job))
        .route("/admin/jobs/{id}/retry", post(handlers::retry_job))
        .route("/admin/jobs/reprocess-dead", post(handlers::reprocess_dead));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .merge(admin_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Ensures every request carries an `X-Request-Id`, generating one when
/// the caller did not send one, and echoes it on the response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = request_id.parse() {
        req.headers_mut().insert("x-request-id", header_value);
    }

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", header_value);
    }
    response
}

/// Starts the API server and blocks until shutdown.
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails.
pub async fn start_server(
    pool: PgPool,
    config: &Config,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let storage = Arc::new(Storage::new(pool));
    let state = AppState::new(storage, Arc::new(RealClock::new()));
    let app = create_router(state, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "api server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("api server stopped gracefully");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received SIGINT, starting graceful shutdown");
        },
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("waiting for in-flight requests to complete");
}

/// Router over a lazily-connected pool, for request-shape tests that never
/// reach the database.
pub fn create_test_router(clock: Arc<dyn Clock>) -> Router {
    let pool = PgPool::connect_lazy("postgresql://localhost/eventhub")
        .expect("lazy pool construction cannot fail");
    let state = AppState::new(Arc::new(Storage::new(pool)), clock);
    create_router(state, &Config::default())
}
