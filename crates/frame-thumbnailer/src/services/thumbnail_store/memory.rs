//! Bounded in-memory tier

use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::trace;

use crate::models::Thumbnail;

/// Strict LRU over thumbnail identities, bounded by entry count
#[derive(Debug)]
pub struct MemoryTier {
    entries: Mutex<LruCache<String, Thumbnail>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up and mark as most recently used
    pub async fn get(&self, identity: &str) -> Option<Thumbnail> {
        self.entries.lock().await.get(identity).cloned()
    }

    /// Insert, returning the identity evicted to make room (if any)
    pub async fn put(&self, identity: &str, thumbnail: Thumbnail) -> Option<String> {
        let evicted = self
            .entries
            .lock()
            .await
            .push(identity.to_string(), thumbnail)
            .map(|(key, _)| key)
            .filter(|key| key != identity);
        if let Some(key) = &evicted {
            trace!("Evicted {} from memory tier", key);
        }
        evicted
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.entries.lock().await.contains(identity)
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.entries.lock().await.cap().get()
    }
}
