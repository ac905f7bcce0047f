//! Bounded LRU cache of attachment bytes with single-flight population.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::{AttachmentError, AttachmentSource};
use crate::config::CacheConfig;
use crate::metrics::Metrics;

struct Entries {
    lru: LruCache<String, Arc<[u8]>>,
    bytes: usize,
}

type Population = Arc<OnceCell<Result<Arc<[u8]>, AttachmentError>>>;

/// Shared attachment cache.
///
/// Cached reads share a read lock. Concurrent misses for the same identifier
/// join one in-flight population: only the first caller hits the source and
/// every waiter receives its outcome, error included. Entries are handed out
/// as `Arc<[u8]>`, so eviction never invalidates bytes a caller already holds.
pub struct AttachmentCache {
    source: Arc<dyn AttachmentSource>,
    limits: CacheConfig,
    entries: RwLock<Entries>,
    in_flight: Mutex<HashMap<String, Population>>,
    metrics: Metrics,
}

impl AttachmentCache {
    pub fn new(source: Arc<dyn AttachmentSource>, limits: CacheConfig, metrics: Metrics) -> Self {
        metrics.cache_items.set(0.0);
        metrics.cache_bytes.set(0.0);

        Self {
            source,
            limits,
            entries: RwLock::new(Entries {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Return the content of `id`, fetching it from the source on a miss.
    pub async fn get(&self, id: &str) -> Result<Arc<[u8]>, AttachmentError> {
        if let Some(bytes) = self.lookup(id).await {
            return Ok(bytes);
        }

        let population = self.join_population(id).await;
        let result = population
            .get_or_init(|| async {
                match self.lookup(id).await {
                    Some(bytes) => Ok(bytes),
                    None => self.populate(id).await,
                }
            })
            .await
            .clone();
        self.finish_population(id, &population).await;

        result
    }

    /// Number of cached attachments.
    pub async fn len(&self) -> usize {
        self.entries.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total bytes held by cached attachments.
    pub async fn size_bytes(&self) -> usize {
        self.entries.read().await.bytes
    }

    async fn lookup(&self, id: &str) -> Option<Arc<[u8]>> {
        let hit = self.entries.read().await.lru.peek(id).cloned();

        // Recency is best effort; a busy writer just means no promotion.
        if hit.is_some() {
            if let Ok(mut entries) = self.entries.try_write() {
                entries.lru.promote(id);
            }
        }

        hit
    }

    async fn populate(&self, id: &str) -> Result<Arc<[u8]>, AttachmentError> {
        debug!(attachment = id, "attachment_cache_miss");

        let bytes: Arc<[u8]> = self.source.fetch(id).await?.into();
        self.insert(id, Arc::clone(&bytes)).await;

        Ok(bytes)
    }

    async fn insert(&self, id: &str, bytes: Arc<[u8]>) {
        let size = bytes.len();
        if size > self.limits.max_bytes {
            warn!(
                attachment = id,
                bytes = size,
                max_bytes = self.limits.max_bytes,
                "attachment_too_large_to_cache"
            );
            return;
        }

        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.lru.put(id.to_string(), bytes) {
            entries.bytes -= previous.len();
        }
        entries.bytes += size;

        while entries.lru.len() > self.limits.max_items || entries.bytes > self.limits.max_bytes {
            let Some((evicted, content)) = entries.lru.pop_lru() else {
                break;
            };
            entries.bytes -= content.len();
            info!(attachment = %evicted, bytes = content.len(), "attachment_cache_evicted");
        }

        self.metrics.cache_items.set(entries.lru.len() as f64);
        self.metrics.cache_bytes.set(entries.bytes as f64);
    }

    async fn join_population(&self, id: &str) -> Population {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(id.to_string()).or_default())
    }

    /// Forget a finished population so later misses start a fresh one.
    async fn finish_population(&self, id: &str, population: &Population) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, population))
        {
            in_flight.remove(id);
        }
    }
}
