//! Relay delivery of rendered batches.
//!
//! A transmission is all or nothing: the relay step cannot report which
//! messages of a batch went out before a failure, so callers must treat an
//! error as "none of them were delivered".

pub mod smtp;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::RenderedMessage;

pub use smtp::SmtpTransmitter;

/// Failure of a whole batch transmission.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("invalid relay configuration: {0}")]
    Config(String),
    #[error("relay error: {0}")]
    Relay(#[from] lettre::transport::smtp::Error),
    #[error("relay unavailable: {0}")]
    Unavailable(String),
    #[error("transmission timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers a batch of rendered messages in one relay session.
#[async_trait]
pub trait Transmit: Send + Sync {
    async fn transmit(&self, messages: &[RenderedMessage]) -> Result<(), TransmitError>;
}
