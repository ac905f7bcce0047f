//! Prometheus metrics setup and metric handles.
//!
//! Handles are registered once against the active recorder and cloned into
//! every component; increments are atomic and never take a global lock.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Counter,
    Gauge, Histogram, Unit,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const EMAILS_RECEIVED: &str = "emails_received_total";
pub const EMAILS_RECEIVED_BYTES: &str = "emails_received_bytes_total";
pub const EMAILS_SENT: &str = "emails_sent_total";
pub const EMAILS_SENT_BYTES: &str = "emails_sent_bytes_total";
pub const ATTACHMENTS_SENT: &str = "emails_attachments_sent_total";
pub const ATTACHMENTS_SENT_BYTES: &str = "emails_attachments_sent_bytes_total";
pub const EMAILS_SENT_WITH_ATTACHMENT: &str = "emails_sent_with_attachment_total";
pub const EMAILS_REQUEUED: &str = "emails_requeued_total";
pub const BATCH_SEND_DURATION: &str = "emails_batch_send_duration_seconds";
pub const CACHE_ITEMS: &str = "emails_attachment_cache_items";
pub const CACHE_BYTES: &str = "emails_attachment_cache_bytes";

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    // Batches range from a single fast relay round trip to large attachment uploads.
    let buckets = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

    PrometheusBuilder::new()
        .set_buckets(&buckets)?
        .install_recorder()
}

/// Register metric descriptions so HELP/TYPE lines are present from startup.
pub fn describe_metrics() {
    describe_counter!(EMAILS_RECEIVED, "Jobs received from the queue");
    describe_counter!(
        EMAILS_RECEIVED_BYTES,
        Unit::Bytes,
        "Payload bytes of jobs received from the queue"
    );
    describe_counter!(EMAILS_SENT, "Emails relayed and acknowledged");
    describe_counter!(
        EMAILS_SENT_BYTES,
        Unit::Bytes,
        "Body bytes of emails relayed and acknowledged"
    );
    describe_counter!(ATTACHMENTS_SENT, "Attachments relayed");
    describe_counter!(
        ATTACHMENTS_SENT_BYTES,
        Unit::Bytes,
        "Bytes of attachments relayed"
    );
    describe_counter!(
        EMAILS_SENT_WITH_ATTACHMENT,
        "Emails relayed with at least one attachment"
    );
    describe_counter!(EMAILS_REQUEUED, "Jobs returned to the queue for retry");
    describe_histogram!(
        BATCH_SEND_DURATION,
        Unit::Seconds,
        "Time to process one batch from dispatch to acknowledgment"
    );
    describe_gauge!(CACHE_ITEMS, "Attachments held in the cache");
    describe_gauge!(CACHE_BYTES, Unit::Bytes, "Bytes held in the attachment cache");
}

/// Process-wide metric handles.
#[derive(Clone)]
pub struct Metrics {
    pub received: Counter,
    pub received_bytes: Counter,
    pub sent: Counter,
    pub sent_bytes: Counter,
    pub attachments_sent: Counter,
    pub attachments_sent_bytes: Counter,
    pub sent_with_attachment: Counter,
    pub requeued: Counter,
    pub batch_send_seconds: Histogram,
    pub cache_items: Gauge,
    pub cache_bytes: Gauge,
}

impl Metrics {
    /// Register every handle with the recorder active at call time.
    pub fn new() -> Self {
        Self {
            received: counter!(EMAILS_RECEIVED),
            received_bytes: counter!(EMAILS_RECEIVED_BYTES),
            sent: counter!(EMAILS_SENT),
            sent_bytes: counter!(EMAILS_SENT_BYTES),
            attachments_sent: counter!(ATTACHMENTS_SENT),
            attachments_sent_bytes: counter!(ATTACHMENTS_SENT_BYTES),
            sent_with_attachment: counter!(EMAILS_SENT_WITH_ATTACHMENT),
            requeued: counter!(EMAILS_REQUEUED),
            batch_send_seconds: histogram!(BATCH_SEND_DURATION),
            cache_items: gauge!(CACHE_ITEMS),
            cache_bytes: gauge!(CACHE_BYTES),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
