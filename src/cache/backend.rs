//! Cache backend implementations.

use super::key::Fingerprint;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A stored payload and its lifetime.
///
/// Expired entries may still be held by a backend until purged; callers decide
/// whether an expired entry is usable (see `KeyedCache::get_stale`).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: Vec<u8>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, payload: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            fingerprint,
            payload,
            created_at: now,
            expires_at: now + ttl,
        }
    }
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored entry, expired or not.
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>>;
    async fn set(&self, key: &Fingerprint, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &Fingerprint) -> Result<bool>;
    /// Delete `key` only if the stored entry is the one written at `created_at`.
    ///
    /// The default re-reads before deleting; backends that can compare and
    /// remove under one lock should override it.
    async fn delete_if_created(&self, key: &Fingerprint, created_at: Instant) -> Result<bool> {
        match self.get(key).await? {
            Some(entry) if entry.created_at == created_at => self.delete(key).await,
            _ => Ok(false),
        }
    }
    async fn clear(&self) -> Result<()>;
    /// Drop entries that expired more than `grace` ago. Returns how many were removed.
    async fn purge_expired(&self, grace: Duration) -> Result<usize>;
    /// Number of unexpired entries.
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

struct Slot {
    entry: CacheEntry,
    last_accessed: Instant,
}

/// In-memory backend bounded by entry count.
///
/// Expired entries stay readable until they are `stale_grace` past expiry.
/// Room for a new key is made only when the cache is full: entries past their
/// grace go first, then expired entries, then the least recently accessed.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Slot>>,
    max_entries: usize,
    stale_grace: Duration,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            stale_grace: Duration::ZERO,
        }
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, Slot>, incoming: &str) {
        if entries.contains_key(incoming) || entries.len() < self.max_entries {
            return;
        }
        let now = Instant::now();
        entries.retain(|_, s| now <= s.entry.expires_at + self.stale_grace);
        while entries.len() >= self.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, s)| (now <= s.entry.expires_at, s.last_accessed))
                .map(|(k, _)| k.clone());
            if let Some(k) = victim {
                entries.remove(&k);
            } else {
                break;
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(key.as_str()).map(|slot| {
            slot.last_accessed = Instant::now();
            slot.entry.clone()
        }))
    }
    async fn set(&self, key: &Fingerprint, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        self.evict_if_needed(&mut entries, key.as_str());
        let entry = CacheEntry::new(key.clone(), value.to_vec(), ttl);
        entries.insert(
            key.hash.clone(),
            Slot {
                last_accessed: entry.created_at,
                entry,
            },
        );
        Ok(())
    }
    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        Ok(self.entries.write().await.remove(key.as_str()).is_some())
    }
    async fn delete_if_created(&self, key: &Fingerprint, created_at: Instant) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get(key.as_str()) {
            Some(slot) if slot.entry.created_at == created_at => {
                entries.remove(key.as_str());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
    async fn purge_expired(&self, grace: Duration) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, s| now <= s.entry.expires_at + grace);
        Ok(before - entries.len())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|s| !s.entry.is_expired())
            .count())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new(4);
        let key = Fingerprint::new("abc");
        cache.set(&key, b"payload", Duration::from_secs(60)).await.unwrap();

        let entry = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.payload, b"payload");
        assert!(!entry.is_expired());
        assert_eq!(cache.len().await.unwrap(), 1);

        assert!(cache.delete(&key).await.unwrap());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_least_recently_accessed() {
        let cache = MemoryCache::new(2);
        let (a, b, c) = (Fingerprint::new("a"), Fingerprint::new("b"), Fingerprint::new("c"));
        let ttl = Duration::from_secs(60);
        cache.set(&a, b"1", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set(&b, b"2", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        // Touch `a` so `b` becomes the eviction candidate.
        cache.get(&a).await.unwrap();
        cache.set(&c, b"3", ttl).await.unwrap();

        assert!(cache.get(&a).await.unwrap().is_some());
        assert!(cache.get(&b).await.unwrap().is_none());
        assert!(cache.get(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = MemoryCache::new(1);
        let a = Fingerprint::new("a");
        cache.set(&a, b"1", Duration::from_secs(60)).await.unwrap();
        cache.set(&a, b"2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&a).await.unwrap().unwrap().payload, b"2");
    }

    #[tokio::test]
    async fn test_insert_keeps_expired_entries_within_grace() {
        let cache = MemoryCache::new(8).with_stale_grace(Duration::from_secs(600));
        let (old, new) = (Fingerprint::new("old"), Fingerprint::new("new"));
        cache.set(&old, b"1", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set(&new, b"2", Duration::from_secs(60)).await.unwrap();

        let kept = cache.get(&old).await.unwrap().unwrap();
        assert!(kept.is_expired());
        assert_eq!(kept.payload, b"1");
    }

    #[tokio::test]
    async fn test_full_cache_evicts_expired_before_live() {
        let cache = MemoryCache::new(2).with_stale_grace(Duration::from_secs(600));
        let (live, expired, incoming) =
            (Fingerprint::new("live"), Fingerprint::new("expired"), Fingerprint::new("incoming"));
        cache.set(&live, b"1", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set(&expired, b"2", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // `expired` was touched last but is still the first to go.
        cache.get(&expired).await.unwrap();
        cache.set(&incoming, b"3", Duration::from_secs(60)).await.unwrap();

        assert!(cache.get(&live).await.unwrap().is_some());
        assert!(cache.get(&expired).await.unwrap().is_none());
        assert!(cache.get(&incoming).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_if_created_spares_newer_write() {
        let cache = MemoryCache::new(4);
        let key = Fingerprint::new("k");
        cache.set(&key, b"first", Duration::from_secs(60)).await.unwrap();
        let first = cache.get(&key).await.unwrap().unwrap().created_at;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set(&key, b"second", Duration::from_secs(60)).await.unwrap();

        assert!(!cache.delete_if_created(&key, first).await.unwrap());
        let current = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(current.payload, b"second");
        assert!(cache.delete_if_created(&key, current.created_at).await.unwrap());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_respects_grace() {
        let cache = MemoryCache::new(8);
        let key = Fingerprint::new("short");
        cache.set(&key, b"x", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Expired but inside the grace window: kept for stale reads.
        assert_eq!(cache.purge_expired(Duration::from_secs(60)).await.unwrap(), 0);
        assert!(cache.get(&key).await.unwrap().unwrap().is_expired());
        assert_eq!(cache.len().await.unwrap(), 0);

        assert_eq!(cache.purge_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
