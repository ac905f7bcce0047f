//! Queue module for RabbitMQ deliveries.
//!
//! This module provides:
//! - The job payload format written by the publisher
//! - [`Job`], a delivery that must be settled exactly once
//!
//! ## Flow
//!
//! ```text
//! Publisher → emails queue → Worker (ack on send, requeue on failure)
//! ```

pub mod job;
pub mod types;

pub use job::{AckError, Acknowledge, Job, ParsedJob};
pub use types::{EmailRequest, Receiver, TemplateRef, DEFAULT_CONTENT_TYPE};
