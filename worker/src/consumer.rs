//! RabbitMQ consumer module using lapin.
//!
//! This module wires the worker together: it connects to RabbitMQ, sets the
//! prefetch that throttles the whole pipeline, builds the batch pipeline and
//! feeds deliveries into the dispatcher until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Connection, ConnectionProperties,
};
use reqwest::Client;
use tokio::{signal, sync::oneshot};
use tracing::{error, info, warn};

use mailworker::{
    metrics::{describe_metrics, install_prometheus_recorder},
    web::{self, AppState},
    AckController, Acknowledge, AttachmentCache, BatchProcessor, Config, Dispatcher,
    HttpAttachmentSource, Job, Materializer, Metrics, SmtpTransmitter,
};

const CONSUMER_TAG: &str = "mail-worker";

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Installs the metrics recorder and binds the metrics server
/// 2. Builds the attachment cache, SMTP transmitter and batch processor
/// 3. Connects to RabbitMQ and sets QoS to `batch size × max batches`
/// 4. Feeds deliveries into the dispatcher until the stream ends or a
///    shutdown signal arrives, then waits for in-flight batches
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    // Metrics first: handles bind to the recorder that is active when created.
    let prometheus = install_prometheus_recorder().context("Failed to install metrics recorder")?;
    describe_metrics();
    let metrics = Metrics::new();

    let listener = web::bind(config.metrics_port).await?;
    let (stop_web, web_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(web::serve(listener, AppState::new(prometheus), async move {
        let _ = web_stopped.await;
    }));

    // Shared HTTP client for the object store
    let client = Client::builder()
        .pool_max_idle_per_host(config.batch.max_concurrent)
        .build()
        .context("Failed to create HTTP client")?;

    let source = HttpAttachmentSource::new(client, &config.attachments);
    let cache = Arc::new(AttachmentCache::new(
        Arc::new(source),
        config.cache,
        metrics.clone(),
    ));

    let transmitter =
        SmtpTransmitter::from_config(&config.smtp).context("Failed to create SMTP transmitter")?;

    let processor = Arc::new(BatchProcessor::new(
        Materializer::new(config.sender.clone(), cache),
        Arc::new(transmitter),
        AckController::new(metrics.clone()),
        metrics.clone(),
        config.smtp.timeout,
    ));

    // Connect to RabbitMQ
    info!(url_length = config.rabbit_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.rabbit_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    // Every buffered or in-flight job counts against the prefetch.
    let prefetch_count = config.batch.prefetch_count();
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    let consumer = channel
        .basic_consume(
            &config.rabbit_queue,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = %config.rabbit_queue, "rabbitmq_consumer_started");
    info!("worker_ready");

    let acker: Arc<dyn Acknowledge> = Arc::new(channel.clone());
    let jobs = consumer.filter_map(move |delivery| {
        let acker = Arc::clone(&acker);
        async move {
            match delivery {
                Ok(delivery) => {
                    let message_id = delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|s| s.to_string());
                    Some(Job::new(delivery.delivery_tag, message_id, delivery.data, acker))
                }
                Err(e) => {
                    error!(error = %e, "rabbitmq_delivery_error");
                    None
                }
            }
        }
    });

    let dispatcher = Dispatcher::new(config.batch, processor, metrics);
    dispatcher.run(Box::pin(jobs), shutdown_signal()).await;

    let _ = stop_web.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "metrics_server_failed"),
        Err(e) => error!(error = %e, "metrics_server_panicked"),
    }

    if let Err(e) = channel.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_channel_close_error");
    }
    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }

    info!("worker_shutdown_complete");
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("worker_stopping");
}
