//! Where attachment bytes come from on a cache miss.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{error, info};

use super::AttachmentError;
use crate::config::AttachmentStoreConfig;

/// Fetches attachment content by identifier.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Vec<u8>, AttachmentError>;
}

/// Object store reachable over plain HTTP (`GET {endpoint}/{bucket}/{id}`).
pub struct HttpAttachmentSource {
    client: Client,
    endpoint: String,
    bucket: String,
    timeout: Duration,
}

impl HttpAttachmentSource {
    pub fn new(client: Client, config: &AttachmentStoreConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.trim_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    fn object_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, id)
    }
}

#[async_trait]
impl AttachmentSource for HttpAttachmentSource {
    async fn fetch(&self, id: &str) -> Result<Vec<u8>, AttachmentError> {
        if id.is_empty() || id.contains("..") {
            return Err(AttachmentError::InvalidId(id.to_string()));
        }

        let url = self.object_url(id);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(attachment = id, error = %e, "attachment_fetch_error");
                AttachmentError::Fetch {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AttachmentError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(AttachmentError::Fetch {
                id: id.to_string(),
                reason: format!("object store returned {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| AttachmentError::Fetch {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        info!(attachment = id, bytes = body.len(), "attachment_fetched");

        Ok(body.to_vec())
    }
}
