//! Ingestion loop: buffer deliveries and cut batches by size or idle time.
//!
//! The loop itself only parses, appends, compares and spawns. Everything that
//! waits on the network runs in a [`WorkerPool`] task.

pub mod batcher;
pub mod pool;

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::metrics::Metrics;
use crate::pipeline::{BatchProcessor, Stage};
use crate::queue::{Job, ParsedJob};

pub use batcher::Batcher;
pub use pool::WorkerPool;

/// Owns the buffer and idle timer for one consumer.
pub struct Dispatcher {
    settings: BatchConfig,
    processor: Arc<BatchProcessor>,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(settings: BatchConfig, processor: Arc<BatchProcessor>, metrics: Metrics) -> Self {
        Self {
            settings,
            processor,
            metrics,
        }
    }

    /// Consume `deliveries` until the stream ends or `shutdown` resolves.
    ///
    /// Whatever is still buffered at that point is dispatched as a final
    /// batch, and the call returns once every worker has finished.
    pub async fn run<S, F>(&self, mut deliveries: S, shutdown: F)
    where
        S: Stream<Item = Job> + Unpin,
        F: Future<Output = ()>,
    {
        let idle_timeout = self.settings.idle_timeout;
        let mut batcher = Batcher::new(self.settings.size);
        let mut pool = WorkerPool::new(self.settings.max_concurrent);

        let idle = sleep(idle_timeout);
        tokio::pin!(idle);
        tokio::pin!(shutdown);

        info!(
            batch_size = self.settings.size,
            max_concurrent = self.settings.max_concurrent,
            idle_timeout_ms = idle_timeout.as_millis() as u64,
            "dispatcher_started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("dispatcher_stopping");
                    break;
                }
                Some(()) = pool.join_next(), if !pool.is_empty() => {}
                delivery = deliveries.next() => {
                    match delivery {
                        Some(job) => {
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                            if let Some(parsed) = self.ingest(job, &mut pool) {
                                if let Some(batch) = batcher.push(parsed) {
                                    self.dispatch(batch, "size", &mut pool);
                                }
                            }
                        }
                        None => {
                            warn!("rabbitmq_consumer_closed");
                            break;
                        }
                    }
                }
                () = &mut idle => {
                    if let Some(batch) = batcher.flush() {
                        self.dispatch(batch, "idle", &mut pool);
                    }
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
            }
        }

        if let Some(batch) = batcher.flush() {
            self.dispatch(batch, "shutdown", &mut pool);
        }
        pool.drain().await;

        info!("dispatcher_stopped");
    }

    /// Count and parse one delivery. Unparseable payloads are requeued right
    /// away and never reach the buffer.
    fn ingest(&self, job: Job, pool: &mut WorkerPool) -> Option<ParsedJob> {
        let body_length = job.payload().len();
        self.metrics.received.increment(1);
        self.metrics.received_bytes.increment(body_length as u64);

        info!(
            delivery_tag = job.delivery_tag(),
            message_id = %job.message_id(),
            body_length = body_length,
            "rabbitmq_job_received"
        );

        match job.parse() {
            Ok(parsed) => Some(parsed),
            Err((job, e)) => {
                warn!(
                    delivery_tag = job.delivery_tag(),
                    message_id = %job.message_id(),
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &job.payload()[..body_length.min(200)]
                    ),
                    "rabbitmq_job_parse_failed"
                );

                let acks = self.processor.acks().clone();
                pool.spawn(async move { acks.requeue(job, Stage::Parse).await });
                None
            }
        }
    }

    fn dispatch(&self, batch: Vec<ParsedJob>, trigger: &'static str, pool: &mut WorkerPool) {
        info!(
            batch_len = batch.len(),
            trigger = trigger,
            in_flight = pool.len(),
            "batch_dispatched"
        );

        let processor = Arc::clone(&self.processor);
        pool.spawn_batch(async move {
            processor.process(batch).await;
        });
    }
}
