//! Key-value store protocol and the in-process backend.
//!
//! The cache only needs five commands: `get`, `setex`, `delete`, `hmset` and
//! `hgetall`. Any store offering them with standard expiry semantics can sit
//! behind [`KeyValueStore`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value store unreachable: {0}")]
    Connection(String),
    #[error("operation against key `{key}` holding the wrong kind of value")]
    WrongType { key: String },
    #[error("expiry must be at least one second, got {0:?}")]
    InvalidTtl(Duration),
    #[error("key-value store error: {0}")]
    Backend(String),
    #[error("unsupported store url `{0}`")]
    UnsupportedUrl(String),
}

impl StoreError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value protocol consumed by the caches.
///
/// Every call is a single round trip and atomic at the single-key level;
/// nothing here retries.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Store `value` under `key`, expiring after `ttl` (whole seconds).
    async fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> StoreResult<()>;

    /// Returns whether a key was removed. Absent keys are not an error.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Set several hash fields. An empty field list is a no-op.
    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    /// All fields of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;
}

/// Truncate to whole seconds, rejecting anything below one.
pub fn ttl_seconds(ttl: Duration) -> StoreResult<u64> {
    match ttl.as_secs() {
        0 => Err(StoreError::InvalidTtl(ttl)),
        secs => Ok(secs),
    }
}

enum Slot {
    Value { bytes: Bytes, expires_at: Instant },
    Hash(HashMap<String, String>),
}

/// Bounded in-process store with LRU eviction and per-key expiry.
///
/// Useful for single-process deployments and tests; every instance is its
/// own keyspace.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Slot>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Number of live slots, including expired values not yet reaped.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, slot: Slot, op: &'static str) {
        let evicted = rw_write(&self.entries, SOURCE, op).push(key.to_string(), slot);
        if evicted.is_some_and(|(evicted_key, _)| evicted_key != key) {
            counter!("cachet_store_evict_total").increment(1);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => Ok(None),
            Some(Slot::Hash(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            Some(Slot::Value { bytes, expires_at }) if *expires_at > Instant::now() => {
                Ok(Some(bytes.clone()))
            }
            Some(Slot::Value { .. }) => {
                entries.pop(key);
                Ok(None)
            }
        }
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> StoreResult<()> {
        let secs = ttl_seconds(ttl)?;
        let slot = Slot::Value {
            bytes: value,
            expires_at: Instant::now() + Duration::from_secs(secs),
        };
        self.insert(key, slot, "setex");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(rw_write(&self.entries, SOURCE, "delete")
            .pop(key)
            .is_some())
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut entries = rw_write(&self.entries, SOURCE, "hmset");
        match entries.get_mut(key) {
            Some(Slot::Hash(existing)) => {
                existing.extend(fields.iter().cloned());
                return Ok(());
            }
            Some(Slot::Value { expires_at, .. }) if *expires_at > Instant::now() => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                });
            }
            _ => {}
        }
        drop(entries);

        self.insert(key, Slot::Hash(fields.iter().cloned().collect()), "hmset");
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match rw_write(&self.entries, SOURCE, "hgetall").get(key) {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(fields)) => Ok(fields.clone()),
            Some(Slot::Value { expires_at, .. }) if *expires_at <= Instant::now() => {
                Ok(HashMap::new())
            }
            Some(Slot::Value { .. }) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }
}

/// Open the backend named by `url`.
///
/// `memory://` gives a fresh [`MemoryStore`] holding up to `capacity` slots.
/// `redis://` and `rediss://` need the `redis` feature.
pub async fn open_store(url: &str, capacity: NonZeroUsize) -> StoreResult<Arc<dyn KeyValueStore>> {
    let scheme = url.split_once("://").map(|(scheme, _)| scheme);
    match scheme {
        Some("memory") => {
            info!(target: SOURCE, capacity = capacity.get(), "using in-process store");
            Ok(Arc::new(MemoryStore::new(capacity)))
        }
        #[cfg(feature = "redis")]
        Some("redis" | "rediss") => {
            let store = super::redis::RedisStore::connect(url).await?;
            info!(target: SOURCE, "connected to redis");
            Ok(Arc::new(store))
        }
        _ => Err(StoreError::UnsupportedUrl(url.to_string())),
    }
}
