//! Mail worker - batched SMTP delivery of queued email jobs.
//!
//! ## Architecture
//!
//! ```text
//! emails queue → Dispatcher (buffer, size/idle trigger) → WorkerPool
//!     → Materializer (AttachmentCache) → Transmitter (SMTP) → ack / requeue
//! ```
//!
//! Every job stays unacknowledged from delivery until its batch settles, so
//! the broker prefetch (`batch size × max concurrent batches`) bounds memory
//! and in-flight work.

pub mod attachment;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod transmit;
pub mod web;

// Re-export commonly used types
pub use crate::metrics::Metrics;
pub use attachment::{AttachmentCache, AttachmentSource, HttpAttachmentSource};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use pipeline::{AckController, BatchOutcome, BatchProcessor, Materializer};
pub use queue::{Acknowledge, EmailRequest, Job};
pub use transmit::{SmtpTransmitter, Transmit};
