//! Broker settlement decisions for every stage of the pipeline.
//!
//! | Outcome                 | Decision                                |
//! |-------------------------|-----------------------------------------|
//! | payload does not parse  | requeue the job                         |
//! | job fails to render     | requeue that job only                   |
//! | relay fails             | requeue every rendered job of the batch |
//! | relay succeeds          | ack every rendered job once             |
//!
//! A failed ack after a successful relay is only logged: the email is already
//! out, and retrying could send it twice.

use std::fmt;

use tracing::{error, info, warn};

use super::materialize::RenderedMessage;
use crate::metrics::Metrics;
use crate::queue::Job;

/// Pipeline stage a settlement decision is made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Materialize,
    Transmit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Parse => "parse",
            Stage::Materialize => "materialize",
            Stage::Transmit => "transmit",
        })
    }
}

/// Issues acks and requeues and keeps the delivery counters.
#[derive(Clone)]
pub struct AckController {
    metrics: Metrics,
}

impl AckController {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    /// Return one job to the queue.
    pub async fn requeue(&self, job: Job, stage: Stage) {
        let delivery_tag = job.delivery_tag();
        let message_id = job.message_id().to_string();

        self.metrics.requeued.increment(1);

        match job.requeue().await {
            Ok(()) => info!(
                stage = %stage,
                delivery_tag = delivery_tag,
                message_id = %message_id,
                "rabbitmq_job_requeued"
            ),
            Err(e) => error!(
                stage = %stage,
                delivery_tag = delivery_tag,
                message_id = %message_id,
                error = %e,
                "rabbitmq_nack_failed"
            ),
        }
    }

    /// Return every job of a failed transmission to the queue.
    ///
    /// Some of them may already have reached the relay; redelivery can
    /// duplicate those.
    pub async fn requeue_all(&self, jobs: Vec<Job>) {
        warn!(jobs = jobs.len(), "batch_requeued_possible_duplicates");

        for job in jobs {
            self.requeue(job, Stage::Transmit).await;
        }
    }

    /// Ack every job of a successful transmission and count what was sent.
    ///
    /// Returns the number of acks the broker accepted.
    pub async fn accept_all(&self, messages: &[RenderedMessage], jobs: Vec<Job>) -> usize {
        let mut acked = 0;

        for (message, job) in messages.iter().zip(jobs) {
            let stats = message.stats;
            self.metrics.sent.increment(1);
            self.metrics.sent_bytes.increment(stats.body_bytes as u64);
            if stats.attachments > 0 {
                self.metrics.attachments_sent.increment(stats.attachments as u64);
                self.metrics
                    .attachments_sent_bytes
                    .increment(stats.attachment_bytes as u64);
                self.metrics.sent_with_attachment.increment(1);
            }

            let delivery_tag = job.delivery_tag();
            let message_id = job.message_id().to_string();
            match job.ack().await {
                Ok(()) => acked += 1,
                Err(e) => error!(
                    delivery_tag = delivery_tag,
                    message_id = %message_id,
                    error = %e,
                    "rabbitmq_ack_failed"
                ),
            }
        }

        acked
    }
}
