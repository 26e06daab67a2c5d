//! # Response Caching Module
//!
//! Content-addressed storage for generated quiz text, keyed by a fingerprint of
//! the normalized request parameters.
//!
//! ## Overview
//!
//! Generation is slow, rate-limited and billed per token, and the same quiz is
//! requested over and over. The cache maps each logical request to the text the
//! upstream produced for it and keeps it for a TTL (one hour by default).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`KeyedCache`] | TTL cache with typed payloads, stats and lazy expiry |
//! | [`CacheConfig`] | TTL, size limits, key prefix and stale grace |
//! | [`CacheBackend`] | Trait for implementing custom cache backends |
//! | [`MemoryCache`] | In-memory backend with least-recently-accessed eviction |
//! | [`FingerprintGenerator`] | Request parameters to SHA-256 fingerprint |
//!
//! ## Example
//!
//! ```rust
//! use quizgate::cache::{CacheConfig, FingerprintGenerator, FingerprintInputs, KeyedCache, MemoryCache};
//! use std::sync::Arc;
//!
//! # async fn demo() -> quizgate::Result<()> {
//! let cache = KeyedCache::new(CacheConfig::default(), Arc::new(MemoryCache::new(1000)));
//! let fp = FingerprintGenerator::new().generate(&FingerprintInputs::quiz("rust", "easy", "mcq"), None);
//!
//! cache.put_default(&fp, &"1. What is ownership?".to_string()).await?;
//! let hit: Option<String> = cache.get(&fp).await;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Corrupt entries
//!
//! A payload that no longer decodes into the requested type is treated as a
//! miss and dropped. Readers never see a decode error.

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, CacheEntry, MemoryCache};
pub use key::{Fingerprint, FingerprintGenerator, FingerprintInputs, TaskKind};
pub use manager::{CacheConfig, CacheStats, KeyedCache, Lookup};
