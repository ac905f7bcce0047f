//! Fakes and builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

use mailworker::attachment::AttachmentError;
use mailworker::config::{BatchConfig, CacheConfig, SenderIdentity};
use mailworker::pipeline::RenderedMessage;
use mailworker::queue::AckError;
use mailworker::transmit::TransmitError;
use mailworker::{
    AckController, Acknowledge, AttachmentCache, AttachmentSource, BatchProcessor, Dispatcher,
    Job, Materializer, Metrics, Transmit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
}

/// Broker double recording every settlement.
#[derive(Default)]
pub struct FakeBroker {
    settlements: Mutex<Vec<(u64, Settlement)>>,
}

impl FakeBroker {
    pub fn settlements(&self) -> Vec<(u64, Settlement)> {
        self.settlements.lock().unwrap().clone()
    }

    pub fn tags(&self, kind: Settlement) -> Vec<u64> {
        let mut tags: Vec<_> = self
            .settlements()
            .into_iter()
            .filter(|(_, s)| *s == kind)
            .map(|(tag, _)| tag)
            .collect();
        tags.sort_unstable();
        tags
    }

    /// Every delivery tag must be settled at most once.
    pub fn assert_settled_once(&self) {
        let mut seen = HashMap::new();
        for (tag, settlement) in self.settlements() {
            if let Some(previous) = seen.insert(tag, settlement) {
                panic!("delivery {tag} settled twice: {previous:?} then {settlement:?}");
            }
        }
    }
}

#[async_trait]
impl Acknowledge for FakeBroker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AckError> {
        self.settlements
            .lock()
            .unwrap()
            .push((delivery_tag, Settlement::Ack));
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), AckError> {
        self.settlements
            .lock()
            .unwrap()
            .push((delivery_tag, Settlement::Requeue));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Accept,
    Fail,
    Hang,
}

/// Relay double recording the recipients of every transmission attempt.
pub struct FakeRelay {
    mode: RelayMode,
    attempts: Mutex<Vec<Vec<String>>>,
}

impl FakeRelay {
    pub fn new(mode: RelayMode) -> Self {
        Self {
            mode,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transmit for FakeRelay {
    async fn transmit(&self, messages: &[RenderedMessage]) -> Result<(), TransmitError> {
        let recipients = messages
            .iter()
            .map(|m| m.envelope.to()[0].to_string())
            .collect();
        self.attempts.lock().unwrap().push(recipients);

        match self.mode {
            RelayMode::Accept => Ok(()),
            RelayMode::Fail => Err(TransmitError::Unavailable(
                "TLS handshake failed".to_string(),
            )),
            RelayMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Object store double with a fixed set of files.
pub struct FakeStore {
    files: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl AttachmentSource for FakeStore {
    async fn fetch(&self, id: &str) -> Result<Vec<u8>, AttachmentError> {
        self.files
            .get(id)
            .cloned()
            .ok_or_else(|| AttachmentError::NotFound(id.to_string()))
    }
}

/// A dispatcher wired to fakes, with its metrics on a private recorder.
pub struct Harness {
    pub broker: Arc<FakeBroker>,
    pub relay: Arc<FakeRelay>,
    pub processor: Arc<BatchProcessor>,
    pub metrics: Metrics,
    pub snapshotter: Snapshotter,
    pub settings: BatchConfig,
}

impl Harness {
    pub fn new(size: usize, idle_timeout: Duration, mode: RelayMode) -> Self {
        Self::with_send_timeout(size, idle_timeout, mode, Duration::from_secs(30))
    }

    pub fn with_send_timeout(
        size: usize,
        idle_timeout: Duration,
        mode: RelayMode,
        send_timeout: Duration,
    ) -> Self {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let metrics = metrics::with_local_recorder(&recorder, Metrics::new);

        let store = FakeStore {
            files: HashMap::from([("invoice.pdf".to_string(), b"%PDF invoice".to_vec())]),
        };
        let cache = AttachmentCache::new(
            Arc::new(store),
            CacheConfig {
                max_items: 16,
                max_bytes: 1 << 20,
            },
            metrics.clone(),
        );
        let materializer = Materializer::new(
            SenderIdentity {
                name: "Mailer".to_string(),
                email: "mailer@example.com".to_string(),
            },
            Arc::new(cache),
        );

        let relay = Arc::new(FakeRelay::new(mode));
        let processor = Arc::new(BatchProcessor::new(
            materializer,
            relay.clone(),
            AckController::new(metrics.clone()),
            metrics.clone(),
            send_timeout,
        ));

        Self {
            broker: Arc::new(FakeBroker::default()),
            relay,
            processor,
            metrics,
            snapshotter,
            settings: BatchConfig {
                size,
                max_concurrent: 4,
                idle_timeout,
            },
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.settings,
            Arc::clone(&self.processor),
            self.metrics.clone(),
        )
    }

    pub fn job(&self, tag: u64, payload: Vec<u8>) -> Job {
        Job::new(tag, Some(format!("msg-{tag}")), payload, self.broker.clone())
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| match value {
                DebugValue::Counter(v) if key.key().name() == name => Some(v),
                _ => None,
            })
            .unwrap_or(0)
    }
}

/// JSON payload as the publisher writes it.
pub fn payload(email: &str, attachments: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "receiver": {"name": "Recipient", "email": email},
        "subject": "Your invoice",
        "message": "Please find your invoice attached.",
        "type": "text/plain",
        "attachments": attachments,
    }))
    .unwrap()
}

pub fn recipient(tag: u64) -> String {
    format!("user{tag}@example.com")
}
