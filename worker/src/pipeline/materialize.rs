//! Turns parsed requests into relay-ready messages.

use std::sync::Arc;

use lettre::{
    address::{AddressError, Envelope},
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    Address, Message,
};
use thiserror::Error;
use tracing::{debug, warn};

use super::ack::{AckController, Stage};
use crate::attachment::{AttachmentCache, AttachmentError};
use crate::config::SenderIdentity;
use crate::queue::{EmailRequest, Job, ParsedJob};

const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// Why one request could not be rendered.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid sender address {address:?}: {source}")]
    Sender {
        address: String,
        source: AddressError,
    },
    #[error("invalid receiver address {address:?}: {source}")]
    Receiver {
        address: String,
        source: AddressError,
    },
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error("invalid content type {0:?}")]
    ContentType(String),
    #[error("building message failed: {0}")]
    Build(String),
}

/// Size accounting for one rendered message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub body_bytes: usize,
    pub attachments: usize,
    pub attachment_bytes: usize,
}

/// A message ready for the relay: SMTP envelope plus RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub envelope: Envelope,
    pub formatted: Vec<u8>,
    pub stats: MessageStats,
}

/// Rendered messages and the jobs they came from, index-aligned.
#[derive(Debug, Default)]
pub struct Materialized {
    messages: Vec<RenderedMessage>,
    jobs: Vec<Job>,
}

impl Materialized {
    fn push(&mut self, message: RenderedMessage, job: Job) {
        self.messages.push(message);
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[RenderedMessage] {
        &self.messages
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn into_parts(self) -> (Vec<RenderedMessage>, Vec<Job>) {
        (self.messages, self.jobs)
    }
}

/// Resolves envelopes and attachments for each job of a batch.
pub struct Materializer {
    sender: SenderIdentity,
    cache: Arc<AttachmentCache>,
}

impl Materializer {
    pub fn new(sender: SenderIdentity, cache: Arc<AttachmentCache>) -> Self {
        Self { sender, cache }
    }

    /// Render every job of `batch` in order.
    ///
    /// A job that fails to render is requeued on its own and left out; the
    /// rest of the batch carries on.
    pub async fn materialize(&self, batch: Vec<ParsedJob>, acks: &AckController) -> Materialized {
        let mut ready = Materialized::default();

        for ParsedJob { request, job } in batch {
            match self.render(&request).await {
                Ok(message) => ready.push(message, job),
                Err(e) => {
                    warn!(
                        delivery_tag = job.delivery_tag(),
                        message_id = %job.message_id(),
                        receiver = %request.receiver.email,
                        error = %e,
                        "email_materialize_failed"
                    );
                    acks.requeue(job, Stage::Materialize).await;
                }
            }
        }

        ready
    }

    /// Build the deliverable message for one request.
    pub async fn render(&self, request: &EmailRequest) -> Result<RenderedMessage, MaterializeError> {
        let from = mailbox(&self.sender.name, &self.sender.email).map_err(|source| {
            MaterializeError::Sender {
                address: self.sender.email.clone(),
                source,
            }
        })?;

        let to = mailbox(&request.receiver.name, &request.receiver.email).map_err(|source| {
            MaterializeError::Receiver {
                address: request.receiver.email.clone(),
                source,
            }
        })?;

        let mut files = Vec::with_capacity(request.attachments.len());
        for id in &request.attachments {
            files.push((id.as_str(), self.cache.get(id).await?));
        }

        let content_type = ContentType::parse(&request.content_type)
            .map_err(|_| MaterializeError::ContentType(request.content_type.clone()))?;
        let body = SinglePart::builder()
            .header(content_type)
            .body(request.message.clone());

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(request.subject.as_str());

        let message = if files.is_empty() {
            builder.singlepart(body)
        } else {
            let file_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
                .map_err(|_| MaterializeError::ContentType(ATTACHMENT_CONTENT_TYPE.to_string()))?;

            let mut parts = MultiPart::mixed().singlepart(body);
            for (id, bytes) in &files {
                parts = parts.singlepart(
                    Attachment::new(file_name(id)).body(bytes.to_vec(), file_type.clone()),
                );
            }
            builder.multipart(parts)
        }
        .map_err(|e| MaterializeError::Build(e.to_string()))?;

        let stats = MessageStats {
            body_bytes: request.message.len(),
            attachments: files.len(),
            attachment_bytes: files.iter().map(|(_, bytes)| bytes.len()).sum(),
        };

        debug!(
            receiver = %request.receiver.email,
            attachments = stats.attachments,
            attachment_bytes = stats.attachment_bytes,
            "email_rendered"
        );

        Ok(RenderedMessage {
            envelope: message.envelope().clone(),
            formatted: message.formatted(),
            stats,
        })
    }
}

fn mailbox(name: &str, email: &str) -> Result<Mailbox, AddressError> {
    let address: Address = email.trim().parse()?;
    let name = name.trim();
    Ok(Mailbox::new(
        (!name.is_empty()).then(|| name.to_string()),
        address,
    ))
}

/// Attachment identifiers may be object keys with a path; mail clients only
/// need the last segment.
fn file_name(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}
