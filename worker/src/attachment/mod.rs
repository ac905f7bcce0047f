//! Attachment resolution.
//!
//! ```text
//! Materializer → AttachmentCache (hit) ─────────────→ bytes
//!                      └─ (miss) → AttachmentSource → bytes
//! ```

pub mod cache;
pub mod source;

use thiserror::Error;

pub use cache::AttachmentCache;
pub use source::{AttachmentSource, HttpAttachmentSource};

/// Failure to resolve one attachment.
#[derive(Debug, Clone, Error)]
pub enum AttachmentError {
    #[error("attachment {0} not found")]
    NotFound(String),
    #[error("invalid attachment id {0:?}")]
    InvalidId(String),
    #[error("fetching attachment {id} failed: {reason}")]
    Fetch { id: String, reason: String },
}
