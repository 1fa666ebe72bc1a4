//! Two-tier thumbnail cache
//!
//! - **Memory tier**: bounded strict-LRU keyed by the request identity
//! - **Disk tier**: persistent, keyed by content fingerprint, never evicted
//!
//! Requests without a fingerprint (animated sources) only ever touch the
//! memory tier. Disk problems are logged and treated as misses; they never
//! fail a request.

pub mod disk;
pub mod memory;

pub use disk::DiskTier;
pub use memory::MemoryTier;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::errors::StoreResult;
use crate::models::{CacheKey, Thumbnail};

/// Snapshot of store activity and tier sizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub disk_entries: usize,
    pub disk_size_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug)]
pub struct ThumbnailStore {
    memory: MemoryTier,
    disk: Option<DiskTier>,
    // Held by writes, clears and disk reads (through promotion), so that a
    // clear cannot interleave with a promotion or a write-through
    lock: Mutex<()>,
    counters: Counters,
}

impl ThumbnailStore {
    /// Build the store described by `config`, opening the disk tier if enabled
    pub async fn new(config: &CacheConfig) -> StoreResult<Self> {
        let disk = if config.disk_enabled {
            Some(DiskTier::open(&config.disk_path).await?)
        } else {
            None
        };
        Ok(Self::from_tiers(MemoryTier::new(config.memory_capacity), disk))
    }

    pub fn memory_only(capacity: usize) -> Self {
        Self::from_tiers(MemoryTier::new(capacity), None)
    }

    pub fn from_tiers(memory: MemoryTier, disk: Option<DiskTier>) -> Self {
        Self {
            memory,
            disk,
            lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn has_disk_tier(&self) -> bool {
        self.disk.is_some()
    }

    /// Memory first, then disk when a fingerprint is given. Disk hits are
    /// promoted into memory.
    pub async fn get(&self, identity: &str, fingerprint: Option<&CacheKey>) -> Option<Thumbnail> {
        if let Some(thumbnail) = self.memory.get(identity).await {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Memory tier hit for {}", identity);
            return Some(thumbnail);
        }

        if let (Some(disk), Some(key)) = (&self.disk, fingerprint) {
            let _guard = self.lock.lock().await;
            // A writer may have filled memory while we waited
            if let Some(thumbnail) = self.memory.get(identity).await {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(thumbnail);
            }
            match disk.get(key).await {
                Ok(Some(thumbnail)) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Disk tier hit for {} ({})", identity, key);
                    self.memory.put(identity, thumbnail.clone()).await;
                    return Some(thumbnail);
                }
                Ok(None) => {}
                Err(e) => warn!("Disk tier read failed for {}: {}", key, e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Memory always; disk only when a fingerprint is given
    pub async fn set(&self, identity: &str, thumbnail: Thumbnail, fingerprint: Option<&CacheKey>) {
        let _guard = self.lock.lock().await;
        if let (Some(disk), Some(key)) = (&self.disk, fingerprint)
            && let Err(e) = disk.put(key, &thumbnail).await
        {
            warn!("Disk tier write failed for {}: {}", key, e);
        }
        self.memory.put(identity, thumbnail).await;
    }

    /// Empty both tiers, returning the number of entries removed
    pub async fn clear_all(&self) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let memory_removed = self.memory.clear().await;
        let disk_removed = match &self.disk {
            Some(disk) => disk.clear().await?,
            None => 0,
        };

        info!(
            "Cleared thumbnail cache: {} memory entries, {} disk entries",
            memory_removed, disk_removed
        );
        Ok(memory_removed + disk_removed)
    }

    pub async fn stats(&self) -> StoreStats {
        let (disk_entries, disk_size_bytes) = match &self.disk {
            Some(disk) => match disk.stats().await {
                Ok(stats) => (stats.total_files, stats.total_size_bytes),
                Err(e) => {
                    warn!("Failed to read disk tier stats: {}", e);
                    (0, 0)
                }
            },
            None => (0, 0),
        };

        StoreStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            memory_entries: self.memory.len().await,
            memory_capacity: self.memory.capacity().await,
            disk_entries,
            disk_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaSource, ThumbnailFormat};
    use std::path::Path;
    use std::sync::Arc;

    fn thumb(tag: u8) -> Thumbnail {
        let mut bytes = Vec::new();
        image::RgbImage::from_pixel(20, 10, image::Rgb([tag, tag, tag]))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        Thumbnail::new(bytes, 20, 10, ThumbnailFormat::Png)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::for_source(&MediaSource::parse(name).unwrap(), 20)
    }

    async fn disk_store(path: &Path, capacity: usize) -> ThumbnailStore {
        ThumbnailStore::new(&CacheConfig {
            memory_capacity: capacity,
            disk_path: path.to_path_buf(),
            disk_enabled: true,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = ThumbnailStore::memory_only(4);
        store.set("a@20", thumb(1), None).await;
        assert_eq!(store.get("a@20", None).await, Some(thumb(1)));
        assert_eq!(store.get("b@20", None).await, None);

        let stats = store.stats().await;
        assert_eq!((stats.memory_hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_eviction_falls_through_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk_store(dir.path(), 2).await;
        let (ka, kb, kc) = (key("/m/a.mp4"), key("/m/b.mp4"), key("/m/c.mp4"));

        store.set("a", thumb(1), Some(&ka)).await;
        store.set("b", thumb(2), Some(&kb)).await;
        store.set("c", thumb(3), Some(&kc)).await;

        // "a" was evicted from memory but is still on disk
        assert_eq!(store.get("a", Some(&ka)).await, Some(thumb(1)));
        let stats = store.stats().await;
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.disk_entries, 3);
        assert_eq!(stats.memory_entries, 2);
    }

    #[tokio::test]
    async fn test_eviction_without_fingerprint_is_a_miss() {
        let store = ThumbnailStore::memory_only(2);
        store.set("a", thumb(1), None).await;
        store.set("b", thumb(2), None).await;
        store.get("a", None).await;
        store.set("c", thumb(3), None).await;

        assert_eq!(store.get("b", None).await, None);
        assert!(store.get("a", None).await.is_some());
        assert!(store.get("c", None).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk_store(dir.path(), 4).await;
        let ka = key("/m/a.mp4");
        store.set("a", thumb(1), Some(&ka)).await;

        assert_eq!(store.clear_all().await.unwrap(), 2);
        assert_eq!(store.get("a", Some(&ka)).await, None);
        assert_eq!(store.stats().await.disk_entries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_all_wins_over_concurrent_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(disk_store(dir.path(), 1).await);
        let ka = key("/m/a.mp4");

        for _ in 0..200 {
            store.set("a", thumb(1), Some(&ka)).await;
            // Push "a" out of memory so the next lookup reads disk
            store.set("b", thumb(2), None).await;

            let reader = {
                let store = store.clone();
                let ka = ka.clone();
                tokio::spawn(async move { store.get("a", Some(&ka)).await })
            };
            let clearer = {
                let store = store.clone();
                tokio::spawn(async move { store.clear_all().await })
            };
            reader.await.unwrap();
            clearer.await.unwrap().unwrap();

            let stats = store.stats().await;
            assert_eq!(stats.memory_entries, 0);
            assert_eq!(stats.disk_entries, 0);
        }
    }

    #[tokio::test]
    async fn test_disk_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThumbnailStore::new(&CacheConfig {
            memory_capacity: 4,
            disk_path: dir.path().join("unused"),
            disk_enabled: false,
        })
        .await
        .unwrap();

        assert!(!store.has_disk_tier());
        store.set("a", thumb(1), Some(&key("/m/a.mp4"))).await;
        assert!(!dir.path().join("unused").exists());
    }
}
