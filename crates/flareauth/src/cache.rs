//! Pluggable key/value cache for provider key sets and service credentials.
//!
//! The engine never owns its cache: a [`CredentialCache`] is injected by the
//! host and may be backed by process memory, Redis, or nothing at all.
//!
//! ## Backends
//!
//! - [`MemoryCache`]: DashMap with per-entry TTL, for tests and single instances
//! - [`RedisCache`]: shared store across instances, TTL enforced by Redis
//! - [`NoOpCache`]: disables caching, every read is a miss
//!
//! ## Advisory semantics
//!
//! Callers go through [`read_json`] / [`write_json`], which turn backend
//! failures into misses and dropped writes. A cache outage therefore costs
//! extra round trips but never fails a verification or a mint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors raised by cache backends.
///
/// These never escape the engine; they are logged and treated as misses.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store failed or could not be reached.
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Key/value store with per-entry expiration hints.
///
/// Implementations must be safe to call concurrently from many
/// verifications and mints at once.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`.
    ///
    /// `ttl` is a hint; backends that cannot expire entries may ignore it.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Removes the value stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Reads and decodes a JSON value, treating every failure as a miss.
pub async fn read_json<T: DeserializeOwned>(cache: &dyn CredentialCache, key: &str) -> Option<T> {
    let raw = match cache.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
            None
        }
    }
}

/// Encodes and stores a JSON value. Failures are logged and dropped.
pub async fn write_json<T: Serialize>(
    cache: &dyn CredentialCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to encode cache entry");
            return;
        }
    };

    if let Err(e) = cache.put(key, raw, ttl).await {
        tracing::warn!(key = %key, error = %e, "cache write failed");
    }
}

/// Removes a value. Failures are logged and dropped.
pub async fn evict(cache: &dyn CredentialCache, key: &str) {
    if let Err(e) = cache.delete(key).await {
        tracing::warn!(key = %key, error = %e, "cache delete failed");
    }
}

/// A cached value with an optional expiry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// The stored value.
    pub value: String,
    /// When this entry stops being served. `None` means never.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Creates a new entry that expires after `ttl`, if given.
    #[must_use]
    pub fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Returns `true` if the entry's TTL has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of entries currently held.
    pub size: usize,
    /// Number of reads served from the cache.
    pub hits: u64,
    /// Number of reads that found nothing usable.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory cache backed by DashMap.
///
/// Expired entries are never served; they are removed lazily on read or in
/// bulk by [`MemoryCache::cleanup_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "cleaned up expired cache entries");
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, including expired ones not yet cleaned up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns hit/miss statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl CredentialCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            // A put may have replaced the entry since it was read
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpCache;

#[async_trait]
impl CredentialCache for NoOpCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn put(
        &self,
        _key: &str,
        _value: String,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Redis-backed cache shared across instances.
///
/// Expiry is delegated to Redis (`SET ... EX`). Keys are namespaced with an
/// optional prefix so several deployments can share one database.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    prefix: String,
}

impl RedisCache {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    /// Creates a pool for `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// No connection is opened until the first cache operation.
    pub fn from_url(url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self::new(pool, prefix))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Backend(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl CredentialCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.namespaced(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        tracing::debug!(key = %key, hit = value.is_some(), "redis cache lookup");
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let key = self.namespaced(key);
        match ttl {
            // Redis rejects EX 0
            Some(ttl) => conn
                .set_ex::<_, _, ()>(&key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| CacheError::Backend(e.to_string())),
            None => conn
                .set::<_, _, ()>(&key, value)
                .await
                .map_err(|e| CacheError::Backend(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.namespaced(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}
