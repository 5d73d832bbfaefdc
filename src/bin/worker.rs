//! EventHub worker process.
//!
//! Claims jobs from the durable queue and runs the side effects: event
//! publishing and registration confirmations through the delivery ledger
//! and the circuit-breaker-protected notifier.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use eventhub_api::Config;
use eventhub_core::{
    jobs::TYPE_REGISTRATION_CONFIRMATION,
    storage::{schema, Storage},
};
use eventhub_worker::{
    HandlerRegistry, LogNotifier, Notifier, ProtectedNotifier, PublishEventHandler,
    RegistrationConfirmationHandler, Worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        health_addr = %config.worker_health_addr,
        concurrency = config.worker_concurrency,
        "configuration loaded"
    );

    let pool = create_pool(&config).await?;
    schema::ensure_schema(&pool).await.context("schema setup failed")?;
    info!("database ready");

    let storage = Storage::new(pool);

    let notifier: Arc<dyn Notifier> = Arc::new(ProtectedNotifier::new(
        Arc::new(LogNotifier::new()),
        config.to_circuit_config(),
    ));

    let registry = HandlerRegistry::new()
        .register(
            "event.publish",
            Arc::new(PublishEventHandler::new(storage.events.clone())),
        )
        .register(
            TYPE_REGISTRATION_CONFIRMATION,
            Arc::new(RegistrationConfirmationHandler::new(
                storage.deliveries.clone(),
                notifier,
            )),
        );

    let worker_id = worker_id();
    let worker = Worker::new(
        config.to_worker_config(worker_id.clone())?,
        storage.jobs.clone(),
        registry,
        config.to_backoff_policy(),
    );

    let token = worker.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        token.cancel();
    });

    info!(worker_id = %worker_id, "worker starting");
    worker.run().await.context("worker runtime failed")?;
    info!("worker shutdown complete");

    Ok(())
}

/// Stable per-process worker ID: hostname plus pid.
fn worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", std::process::id())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,eventhub=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

async fn create_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_err) if retries < MAX_RETRIES => {
                retries += 1;
                info!(attempt = retries, max_retries = MAX_RETRIES, "database connection failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(err) => {
                return Err(err).context("failed to create database pool after retries");
            },
        }
    }
}

async fn shutdown_signal() {
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
        () = ctrl_c => {},
        () = terminate => {},
    }
}
