//! Cachet Cache System
//!
//! Caching layers over a plain key-value store:
//!
//! - **Request cache**: stores whole response bodies keyed by the request
//! - **Fragment cache**: memoises rendered pieces of a page
//! - **Versioned keys**: per-object version tags that orphan derived entries
//!   on every write, plus attribute snapshots read by partial proxies
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `cachet.toml`:
//!
//! ```toml
//! [cache]
//! view_cache_key_tpl = "{prefix}:{endpoint}"
//! view_cache_key_prefix = "views"
//! view_cache_timeout = 3600
//! auto_model_cache_key = true
//!
//! [cache.cache_model_attrs]
//! Profile = ["name", "email"]
//! ```

mod config;
mod error;
mod fragment;
mod keys;
pub(crate) mod lock;
mod middleware;
mod proxy;
#[cfg(feature = "redis")]
mod redis;
pub mod request;
mod store;
mod versioned;

pub use config::{
    CacheConfig, DEFAULT_VIEW_CACHE_KEY_PREFIX, DEFAULT_VIEW_CACHE_KEY_TPL,
    DEFAULT_VIEW_CACHE_TIMEOUT,
};
pub use error::CacheError;
pub use fragment::{FragmentCache, FragmentOptions};
pub use keys::{CacheKey, Facets, KeyError, KeyParts, KeyTemplate, RequestInfo, RequestKeyBuilder};
pub use middleware::{MAX_CACHED_BODY, request_cache_layer};
pub use proxy::{PartialObjectProxy, ProxyError, Snapshot};
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use request::{CacheView, PendingStore, RequestCache, ViewOptions};
pub use store::{
    DEFAULT_MEMORY_CAPACITY, KeyValueStore, MemoryStore, StoreError, StoreResult, open_store,
};
pub use versioned::{VersionTag, VersionedKeyStore, snapshot_key};
