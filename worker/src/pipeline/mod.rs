//! Batch processing: materialize → transmit → acknowledge.
//!
//! ```text
//! Batch → Materializer ─(failed job)→ requeue
//!              │
//!              ▼
//!         Transmitter ─(error)→ requeue whole batch
//!              │
//!              ▼
//!          ack each job
//! ```

pub mod ack;
pub mod materialize;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::metrics::Metrics;
use crate::queue::ParsedJob;
use crate::transmit::{Transmit, TransmitError};

pub use ack::{AckController, Stage};
pub use materialize::{MaterializeError, Materialized, Materializer, MessageStats, RenderedMessage};

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing survived materialization; no relay session was opened.
    Empty { requeued: usize },
    /// The relay accepted every rendered message.
    Sent { sent: usize, acked: usize, requeued: usize },
    /// The relay failed; every job of the batch went back to the queue.
    Failed { requeued: usize },
}

/// Processes one detached batch end to end.
pub struct BatchProcessor {
    materializer: Materializer,
    transmitter: Arc<dyn Transmit>,
    acks: AckController,
    metrics: Metrics,
    send_timeout: Duration,
}

impl BatchProcessor {
    pub fn new(
        materializer: Materializer,
        transmitter: Arc<dyn Transmit>,
        acks: AckController,
        metrics: Metrics,
        send_timeout: Duration,
    ) -> Self {
        Self {
            materializer,
            transmitter,
            acks,
            metrics,
            send_timeout,
        }
    }

    pub fn acks(&self) -> &AckController {
        &self.acks
    }

    pub async fn process(&self, batch: Vec<ParsedJob>) -> BatchOutcome {
        let started = Instant::now();
        let batch_len = batch.len();

        let ready = self.materializer.materialize(batch, &self.acks).await;
        let dropped = batch_len - ready.len();
        if ready.is_empty() {
            info!(batch_len = batch_len, "batch_empty_after_materialize");
            return BatchOutcome::Empty { requeued: dropped };
        }

        let (messages, jobs) = ready.into_parts();

        let transmitted = tokio::time::timeout(self.send_timeout, self.transmitter.transmit(&messages))
            .await
            .unwrap_or(Err(TransmitError::Timeout(self.send_timeout)));

        match transmitted {
            Ok(()) => {
                let sent = messages.len();
                let acked = self.acks.accept_all(&messages, jobs).await;
                self.metrics
                    .batch_send_seconds
                    .record(started.elapsed().as_secs_f64());

                info!(
                    batch_len = batch_len,
                    sent = sent,
                    acked = acked,
                    requeued = dropped,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "batch_sent"
                );

                BatchOutcome::Sent {
                    sent,
                    acked,
                    requeued: dropped,
                }
            }
            Err(e) => {
                error!(
                    batch_len = batch_len,
                    rendered = messages.len(),
                    error = %e,
                    "batch_transmit_failed"
                );

                let requeued = dropped + jobs.len();
                self.acks.requeue_all(jobs).await;

                BatchOutcome::Failed { requeued }
            }
        }
    }
}
