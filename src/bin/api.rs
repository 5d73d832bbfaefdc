//! EventHub API process.
//!
//! Serves registrations, the publish pipeline entry point and the admin
//! jobs surface. Deferred side effects are enqueued here and executed by
//! the companion worker process.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use eventhub_api::Config;
use eventhub_core::storage::schema;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        "configuration loaded"
    );

    let pool = create_pool(&config).await?;
    schema::ensure_schema(&pool).await.context("schema setup failed")?;
    info!("database ready");

    let addr = config.parse_server_addr()?;
    eventhub_api::start_server(pool, &config, addr).await.context("api server failed")?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,eventhub=debug,tower_http=debug"))
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
