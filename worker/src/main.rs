//! Mail Worker - async RabbitMQ consumer that relays queued emails over SMTP.
//!
//! Jobs are buffered into batches, rendered with their attachments and sent
//! in one SMTP session per batch. Each job is acked once its batch is relayed
//! and requeued on any failure.

mod consumer;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailworker::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    tracing::info!(
        queue = %config.rabbit_queue,
        smtp_host = %config.smtp.host,
        smtp_port = config.smtp.port,
        implicit_tls = config.smtp.implicit_tls,
        batch_size = config.batch.size,
        max_concurrent_batches = config.batch.max_concurrent,
        idle_timeout_secs = config.batch.idle_timeout.as_secs(),
        cache_max_items = config.cache.max_items,
        cache_max_bytes = config.cache.max_bytes,
        "config_loaded"
    );

    // Start the consumer
    consumer::run(config).await?;

    Ok(())
}
