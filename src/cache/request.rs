//! Whole-response cache.
//!
//! A handler calls [`RequestCache::cache_view`] early. On a warm key it gets
//! the stored body back and should respond with it immediately. On a cold key
//! the key and timeout are remembered in per-request scratch state, and
//! [`RequestCache::finalize_response`] stores the finished body once the
//! response is complete.
//!
//! The scratch state is task-local and only exists inside [`scope`].

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheKey, Facets, KeyError, KeyParts, RequestInfo, RequestKeyBuilder};
use super::store::KeyValueStore;

tokio::task_local! {
    static PENDING: RefCell<Option<PendingStore>>;
}

/// A response waiting to be stored once its body is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStore {
    pub key: CacheKey,
    pub timeout: Duration,
}

/// Run `f` with fresh per-request scratch state.
pub async fn scope<F: Future>(f: F) -> F::Output {
    PENDING.scope(RefCell::new(None), f).await
}

/// Whether the current task is inside [`scope`].
pub fn in_scope() -> bool {
    PENDING.try_with(|_| ()).is_ok()
}

/// The pending store recorded for the current request, if any.
pub fn pending() -> Option<PendingStore> {
    PENDING
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

fn remember(entry: PendingStore) -> Result<(), CacheError> {
    PENDING
        .try_with(|slot| {
            slot.borrow_mut().replace(entry);
        })
        .map_err(|_| CacheError::MissingRequestScope)
}

fn take_pending() -> Result<Option<PendingStore>, CacheError> {
    PENDING
        .try_with(|slot| slot.borrow_mut().take())
        .map_err(|_| CacheError::MissingRequestScope)
}

/// Per-call overrides for [`RequestCache`].
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    pub timeout: Option<Duration>,
    /// Key template replacing the configured one.
    pub key: Option<String>,
    pub namespace: Option<KeyParts>,
    pub facets: Option<Facets>,
}

impl ViewOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<KeyParts>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn facets(mut self, facets: impl Into<Facets>) -> Self {
        self.facets = Some(facets.into());
        self
    }
}

/// Outcome of [`RequestCache::cache_view`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheView {
    /// Respond immediately with these bytes.
    Hit(Bytes),
    /// Run the handler; the body will be stored under this key.
    Proceed(CacheKey),
}

pub struct RequestCache {
    store: Arc<dyn KeyValueStore>,
    keys: RequestKeyBuilder,
    config: CacheConfig,
}

impl RequestCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            keys: config.request_key_builder(),
            store,
            config,
        }
    }

    pub fn key_for(
        &self,
        request: &RequestInfo,
        options: &ViewOptions,
    ) -> Result<CacheKey, KeyError> {
        self.keys.build(
            options.key.as_deref(),
            request,
            options.namespace.clone(),
            options.facets.clone(),
        )
    }

    #[instrument(skip_all, fields(endpoint = %request.endpoint, path = %request.path))]
    pub async fn cache_view(
        &self,
        request: &RequestInfo,
        options: ViewOptions,
    ) -> Result<CacheView, CacheError> {
        if !in_scope() {
            return Err(CacheError::MissingRequestScope);
        }

        let key = self.key_for(request, &options)?;
        if let Some(body) = self.store.get(key.as_str()).await? {
            counter!("cachet_request_hit_total").increment(1);
            debug!(cache = "request", outcome = "hit", key = %key, "serving cached response");
            return Ok(CacheView::Hit(body));
        }

        counter!("cachet_request_miss_total").increment(1);
        let timeout = self.config.view_timeout(options.timeout);
        debug!(
            cache = "request",
            outcome = "miss",
            key = %key,
            timeout_secs = timeout.as_secs(),
            "response will be stored after the handler"
        );
        remember(PendingStore {
            key: key.clone(),
            timeout,
        })?;
        Ok(CacheView::Proceed(key))
    }

    /// Store `body` under the pending key, if `cache_view` left one.
    ///
    /// Returns the key written. The pending entry is consumed, so a second
    /// call in the same request stores nothing.
    pub async fn finalize_response(&self, body: Bytes) -> Result<Option<CacheKey>, CacheError> {
        let Some(PendingStore { key, timeout }) = take_pending()? else {
            return Ok(None);
        };

        self.store.setex(key.as_str(), timeout, body).await?;
        counter!("cachet_request_store_total").increment(1);
        debug!(cache = "request", key = %key, "response stored");
        Ok(Some(key))
    }

    /// Drop the pending entry without storing anything.
    pub fn discard_pending(&self) -> Option<PendingStore> {
        take_pending().ok().flatten()
    }

    /// Delete the computed key. Absent keys are fine.
    pub async fn clear_request_cache(
        &self,
        request: &RequestInfo,
        options: ViewOptions,
    ) -> Result<CacheKey, CacheError> {
        let key = self.key_for(request, &options)?;
        let removed = self.store.delete(key.as_str()).await?;
        debug!(cache = "request", key = %key, removed, "request cache cleared");
        Ok(key)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;

    fn profile_request() -> RequestInfo {
        RequestInfo::new("/profiles/{id}", "/profiles/42", "GET")
    }

    fn cache() -> (Arc<MemoryStore>, RequestCache) {
        let store = Arc::new(MemoryStore::default());
        let cache = RequestCache::new(store.clone(), CacheConfig::default());
        (store, cache)
    }

    #[tokio::test]
    async fn cold_key_proceeds_and_finalize_stores_body() {
        let (store, cache) = cache();

        let key = scope(async {
            let view = cache
                .cache_view(&profile_request(), ViewOptions::default().facets(["42"]))
                .await
                .expect("cache_view");
            let CacheView::Proceed(key) = view else {
                panic!("expected a cold key");
            };
            assert_eq!(pending().map(|p| p.timeout), Some(Duration::from_secs(3600)));

            let stored = cache
                .finalize_response(Bytes::from("<h1>Alice</h1>"))
                .await
                .expect("finalize");
            assert_eq!(stored.as_ref(), Some(&key));
            key
        })
        .await;

        assert_eq!(key.as_str(), "views:/profiles/{id}:42");
        assert_eq!(
            store.get(key.as_str()).await.expect("get"),
            Some(Bytes::from("<h1>Alice</h1>"))
        );
    }

    #[tokio::test]
    async fn warm_key_returns_hit_without_pending_store() {
        let (store, cache) = cache();
        store
            .setex(
                "views:/profiles/{id}",
                Duration::from_secs(60),
                Bytes::from("cached"),
            )
            .await
            .expect("setex");

        scope(async {
            let view = cache
                .cache_view(&profile_request(), ViewOptions::default())
                .await
                .expect("cache_view");
            assert_eq!(view, CacheView::Hit(Bytes::from("cached")));
            assert!(pending().is_none());
            assert_eq!(
                cache
                    .finalize_response(Bytes::from("other"))
                    .await
                    .expect("finalize"),
                None
            );
        })
        .await;
    }

    #[tokio::test]
    async fn explicit_timeout_overrides_view_default() {
        let (_, cache) = cache();
        scope(async {
            cache
                .cache_view(
                    &profile_request(),
                    ViewOptions::default().timeout(Duration::from_secs(30)),
                )
                .await
                .expect("cache_view");
            assert_eq!(pending().map(|p| p.timeout), Some(Duration::from_secs(30)));
        })
        .await;
    }

    #[tokio::test]
    async fn finalize_only_stores_once() {
        let (_, cache) = cache();
        scope(async {
            cache
                .cache_view(&profile_request(), ViewOptions::default())
                .await
                .expect("cache_view");
            assert!(cache
                .finalize_response(Bytes::from("a"))
                .await
                .expect("finalize")
                .is_some());
            assert!(cache
                .finalize_response(Bytes::from("b"))
                .await
                .expect("finalize")
                .is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn discard_pending_skips_the_store() {
        let (store, cache) = cache();
        scope(async {
            cache
                .cache_view(&profile_request(), ViewOptions::default())
                .await
                .expect("cache_view");
            assert!(cache.discard_pending().is_some());
            cache
                .finalize_response(Bytes::from("error page"))
                .await
                .expect("finalize");
        })
        .await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn outside_scope_is_an_error() {
        let (_, cache) = cache();
        assert!(matches!(
            cache
                .cache_view(&profile_request(), ViewOptions::default())
                .await,
            Err(CacheError::MissingRequestScope)
        ));
        assert!(matches!(
            cache.finalize_response(Bytes::new()).await,
            Err(CacheError::MissingRequestScope)
        ));
    }

    #[tokio::test]
    async fn clear_request_cache_is_idempotent() {
        let (store, cache) = cache();
        let options = ViewOptions::default().namespace("tenant-a");

        let key = cache
            .clear_request_cache(&profile_request(), options.clone())
            .await
            .expect("clear absent key");
        assert_eq!(key.as_str(), "tenant-a:views:/profiles/{id}");

        store
            .setex(key.as_str(), Duration::from_secs(60), Bytes::from("x"))
            .await
            .expect("setex");
        cache
            .clear_request_cache(&profile_request(), options)
            .await
            .expect("clear present key");
        assert!(store.get(key.as_str()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn template_errors_propagate() {
        let (_, cache) = cache();
        let result = scope(cache.cache_view(&profile_request(), ViewOptions::default().key("{user}")))
            .await;
        assert!(matches!(result, Err(CacheError::Key(_))));
    }
}
