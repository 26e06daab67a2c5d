//! Keyed cache over a pluggable backend.

use super::backend::CacheBackend;
use super::key::Fingerprint;
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entry_size: usize,
    pub key_prefix: Option<String>,
    /// How long an expired entry stays available to `get_stale`.
    pub stale_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            enabled: true,
            max_entry_size: 1024 * 1024,
            key_prefix: Some("quiz_cache".into()),
            stale_grace: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
    pub fn without_key_prefix(mut self) -> Self {
        self.key_prefix = None;
        self
    }
    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }
    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Undecodable entries and backend failures, all served as misses.
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    Expired,
    /// Stored bytes could not be decoded; the entry has been dropped.
    Corrupt,
}

impl<T> Lookup<T> {
    pub fn into_hit(self) -> Option<T> {
        match self {
            Lookup::Hit(v) => Some(v),
            _ => None,
        }
    }
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Fingerprint-addressed response cache with TTL expiry.
///
/// Reads never fail: a backend error or an undecodable payload is reported as
/// a miss so the caller regenerates.
pub struct KeyedCache {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    stats: AtomicStats,
}

impl KeyedCache {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn lookup<T: DeserializeOwned>(&self, key: &Fingerprint) -> Lookup<T> {
        if !self.config.enabled {
            return Lookup::Miss;
        }
        let prefixed = self.prefix_key(key);
        let entry = match self.backend.get(&prefixed).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %key, backend = self.backend.name(), error = %e, "cache backend read failed");
                return Lookup::Miss;
            }
        };
        if entry.is_expired() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::Expired;
        }
        match serde_json::from_slice(&entry.payload) {
            Ok(val) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Hit(val)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %key, error = %e, "dropping undecodable cache entry");
                // A fresh write may have replaced the bad bytes since our read.
                match self.backend.delete_if_created(&prefixed, entry.created_at).await {
                    Ok(true) => {
                        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(false) => {
                        debug!(fingerprint = %key, "undecodable entry already replaced");
                    }
                    Err(e) => {
                        warn!(fingerprint = %key, backend = self.backend.name(), error = %e, "failed to drop undecodable cache entry");
                    }
                }
                Lookup::Corrupt
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &Fingerprint) -> Option<T> {
        self.lookup(key).await.into_hit()
    }

    /// Read an entry even if it has expired, as long as it is no more than
    /// `stale_grace` past expiry.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &Fingerprint) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        let entry = self.backend.get(&self.prefix_key(key)).await.ok()??;
        if Instant::now() > entry.expires_at + self.config.stale_grace {
            return None;
        }
        serde_json::from_slice(&entry.payload).ok()
    }

    pub async fn put<T: Serialize>(&self, key: &Fingerprint, value: &T, ttl: Duration) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            debug!(fingerprint = %key, size = data.len(), "payload exceeds max_entry_size, not cached");
            return Ok(());
        }
        let prefixed = self.prefix_key(key);
        match self.backend.set(&prefixed, &data, ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn put_default<T: Serialize>(&self, key: &Fingerprint, value: &T) -> Result<()> {
        self.put(key, value, self.config.default_ttl).await
    }

    pub async fn invalidate(&self, key: &Fingerprint) -> Result<bool> {
        let deleted = self.backend.delete(&self.prefix_key(key)).await?;
        if deleted {
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    /// Administrative flush of every entry.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired(self.config.stale_grace).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn prefix_key(&self, key: &Fingerprint) -> Fingerprint {
        if let Some(ref p) = self.config.key_prefix {
            Fingerprint::new(format!("{}:{}", p, key.hash))
        } else {
            key.clone()
        }
    }
}
