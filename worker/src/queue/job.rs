//! Broker deliveries and their acknowledgment handle.
//!
//! A [`Job`] is settled by exactly one call to [`Job::ack`] or
//! [`Job::requeue`]. Both consume the job, so settling twice does not compile.
//! A job dropped unsettled, for instance by a panicking batch worker, is
//! requeued in the background so it stops holding a prefetch slot.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicNackOptions},
    Channel,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, warn};

use super::types::EmailRequest;

/// Failure to report a settlement back to the broker.
#[derive(Debug, Error)]
pub enum AckError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Settles deliveries on the broker side.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Accept the delivery; the broker drops it.
    async fn ack(&self, delivery_tag: u64) -> Result<(), AckError>;

    /// Reject the delivery and put it back on the queue.
    async fn requeue(&self, delivery_tag: u64) -> Result<(), AckError>;
}

#[async_trait]
impl Acknowledge for Channel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AckError> {
        self.basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(AckError::from)
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), AckError> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue: true,
                ..Default::default()
            },
        )
        .await
        .map_err(AckError::from)
    }
}

/// One message received from the broker, not yet settled.
pub struct Job {
    delivery_tag: u64,
    message_id: String,
    payload: Vec<u8>,
    acker: Arc<dyn Acknowledge>,
    settled: bool,
}

impl Job {
    pub fn new(
        delivery_tag: u64,
        message_id: Option<String>,
        payload: Vec<u8>,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            delivery_tag,
            message_id: message_id.unwrap_or_else(|| "unknown".to_string()),
            payload,
            acker,
            settled: false,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the payload, keeping the job attached to the result.
    ///
    /// On failure the job is handed back so the caller can requeue it.
    pub fn parse(self) -> Result<ParsedJob, (Job, serde_json::Error)> {
        match EmailRequest::from_slice(&self.payload) {
            Ok(request) => Ok(ParsedJob { request, job: self }),
            Err(e) => Err((self, e)),
        }
    }

    pub async fn ack(mut self) -> Result<(), AckError> {
        self.settled = true;
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn requeue(mut self) -> Result<(), AckError> {
        self.settled = true;
        self.acker.requeue(self.delivery_tag).await
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        warn!(
            delivery_tag = self.delivery_tag,
            message_id = %self.message_id,
            "job_dropped_unsettled"
        );

        // Without a runtime the broker channel is gone too.
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let acker = Arc::clone(&self.acker);
        let delivery_tag = self.delivery_tag;
        let message_id = std::mem::take(&mut self.message_id);
        runtime.spawn(async move {
            if let Err(e) = acker.requeue(delivery_tag).await {
                error!(
                    delivery_tag = delivery_tag,
                    message_id = %message_id,
                    error = %e,
                    "rabbitmq_nack_failed"
                );
            }
        });
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("delivery_tag", &self.delivery_tag)
            .field("message_id", &self.message_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A job whose payload decoded into an [`EmailRequest`].
#[derive(Debug)]
pub struct ParsedJob {
    pub request: EmailRequest,
    pub job: Job,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(u64, &'static str)>>,
    }

    #[async_trait]
    impl Acknowledge for Recorder {
        async fn ack(&self, delivery_tag: u64) -> Result<(), AckError> {
            self.calls.lock().unwrap().push((delivery_tag, "ack"));
            Ok(())
        }

        async fn requeue(&self, delivery_tag: u64) -> Result<(), AckError> {
            self.calls.lock().unwrap().push((delivery_tag, "requeue"));
            Ok(())
        }
    }

    #[test]
    fn test_parse_valid_payload() {
        let recorder = Arc::new(Recorder::default());
        let payload = br#"{"receiver":{"email":"a@example.com"},"subject":"s","message":"m"}"#;
        let job = Job::new(7, Some("msg-7".to_string()), payload.to_vec(), recorder);

        let parsed = job.parse().unwrap();
        assert_eq!(parsed.request.receiver.email, "a@example.com");
        assert_eq!(parsed.job.delivery_tag(), 7);
        assert_eq!(parsed.job.message_id(), "msg-7");
    }

    #[test]
    fn test_parse_invalid_payload_returns_job() {
        let recorder = Arc::new(Recorder::default());
        let job = Job::new(3, None, b"{".to_vec(), recorder);

        let (job, _err) = job.parse().unwrap_err();
        assert_eq!(job.delivery_tag(), 3);
        assert_eq!(job.message_id(), "unknown");
    }

    #[tokio::test]
    async fn test_settlement_uses_delivery_tag() {
        let recorder = Arc::new(Recorder::default());
        Job::new(1, None, vec![], recorder.clone()).ack().await.unwrap();
        Job::new(2, None, vec![], recorder.clone()).requeue().await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(1, "ack"), (2, "requeue")]);
    }

    async fn settle_background() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_dropped_job_is_requeued() {
        let recorder = Arc::new(Recorder::default());
        drop(Job::new(9, None, vec![], recorder.clone()));
        settle_background().await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec![(9, "requeue")]);
    }

    #[tokio::test]
    async fn test_job_lost_in_panicking_task_is_requeued() {
        let recorder = Arc::new(Recorder::default());
        let job = Job::new(11, None, vec![], recorder.clone());

        let task = tokio::spawn(async move {
            let _held = job;
            panic!("batch worker failed");
        });
        assert!(task.await.unwrap_err().is_panic());
        settle_background().await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec![(11, "requeue")]);
    }

    #[tokio::test]
    async fn test_settled_job_is_not_requeued_on_drop() {
        let recorder = Arc::new(Recorder::default());
        Job::new(4, None, vec![], recorder.clone()).ack().await.unwrap();
        settle_background().await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec![(4, "ack")]);
    }
}
