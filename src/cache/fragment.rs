//! Fragment cache: memoises rendered pieces of a page.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, instrument};

use crate::domain::{Model, ObjectStore};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheKey, Facets, KeyError, KeyParts, RequestInfo, RequestKeyBuilder};
use super::store::KeyValueStore;
use super::versioned::{VersionTag, VersionedKeyStore};

/// Per-fragment options.
///
/// `name` becomes the first facet, so fragments of the same page stay apart.
#[derive(Debug, Clone, Default)]
pub struct FragmentOptions {
    pub name: Option<String>,
    pub timeout: Option<Duration>,
    pub key: Option<String>,
    pub namespace: Option<KeyParts>,
    pub facets: Option<Facets>,
}

impl FragmentOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

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

pub struct FragmentCache {
    store: Arc<dyn KeyValueStore>,
    keys: RequestKeyBuilder,
    versions: Arc<VersionedKeyStore>,
    config: CacheConfig,
}

impl FragmentCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        versions: Arc<VersionedKeyStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            keys: config.request_key_builder(),
            store,
            versions,
            config,
        }
    }

    pub fn key_for(
        &self,
        request: &RequestInfo,
        options: &FragmentOptions,
    ) -> Result<CacheKey, KeyError> {
        let facets = match &options.name {
            Some(name) => Some(options.facets.clone().unwrap_or_default().prepend(name)),
            None => options.facets.clone(),
        };
        self.keys.build(
            options.key.as_deref(),
            request,
            options.namespace.clone(),
            facets,
        )
    }

    /// Return the cached fragment, or run `compute`, store its output and
    /// return it. A failing `compute` stores nothing.
    #[instrument(skip_all, fields(endpoint = %request.endpoint, fragment = options.name.as_deref()))]
    pub async fn render_cached<F, Fut, E>(
        &self,
        request: &RequestInfo,
        options: FragmentOptions,
        compute: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: From<CacheError>,
    {
        let key = self.key_for(request, &options).map_err(CacheError::from)?;
        if let Some(fragment) = self.store.get(key.as_str()).await.map_err(CacheError::from)? {
            counter!("cachet_fragment_hit_total").increment(1);
            debug!(cache = "fragment", outcome = "hit", key = %key);
            return Ok(fragment);
        }

        counter!("cachet_fragment_miss_total").increment(1);
        let rendered = compute().await?;
        let timeout = self.config.fragment_timeout(options.timeout);
        self.store
            .setex(key.as_str(), timeout, rendered.clone())
            .await
            .map_err(CacheError::from)?;
        debug!(
            cache = "fragment",
            outcome = "miss",
            key = %key,
            timeout_secs = timeout.as_secs(),
            "fragment stored"
        );
        Ok(rendered)
    }

    /// Like [`render_cached`](Self::render_cached), keyed by the model's
    /// version tag instead of the request template.
    ///
    /// A model without a tag is refreshed and saved first. Updating the model
    /// rotates the tag, which orphans the old fragment.
    pub async fn render_cached_for<M, F, Fut, E>(
        &self,
        request: &RequestInfo,
        object: &mut M,
        objects: &dyn ObjectStore<M>,
        options: FragmentOptions,
        compute: F,
    ) -> Result<Bytes, E>
    where
        M: Model,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: From<CacheError>,
    {
        let tag = self.model_tag(object, objects).await?;
        let options = options.key(escape_template(tag.as_str()));
        self.render_cached(request, options, compute).await
    }

    async fn model_tag<M: Model>(
        &self,
        object: &mut M,
        objects: &dyn ObjectStore<M>,
    ) -> Result<VersionTag, CacheError> {
        match object.version_tag() {
            Some(tag) => Ok(tag.clone()),
            None => self.versions.refresh_and_save(object, objects).await,
        }
    }
}

// Version tags embed the primary key verbatim and must not read as placeholders.
fn escape_template(raw: &str) -> String {
    raw.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::domain::{DomainError, Profile};

    #[derive(Default)]
    struct SavedProfiles(Mutex<Vec<Profile>>);

    #[async_trait]
    impl ObjectStore<Profile> for SavedProfiles {
        async fn get(&self, pk: &u64) -> Result<Option<Profile>, DomainError> {
            Ok(self
                .0
                .lock()
                .expect("lock")
                .iter()
                .find(|profile| profile.id == *pk)
                .cloned())
        }

        async fn save(&self, object: &Profile) -> Result<(), DomainError> {
            self.0.lock().expect("lock").push(object.clone());
            Ok(())
        }
    }

    fn fragments() -> (Arc<MemoryStore>, FragmentCache) {
        let store = Arc::new(MemoryStore::default());
        let config = CacheConfig::default();
        let versions = Arc::new(VersionedKeyStore::new(store.clone(), config.clone()));
        (store.clone(), FragmentCache::new(store, versions, config))
    }

    fn request() -> RequestInfo {
        RequestInfo::new("/profiles/{id}", "/profiles/42", "GET")
    }

    #[test]
    fn name_is_the_first_facet() {
        let (_, cache) = fragments();
        let key = cache
            .key_for(
                &request(),
                &FragmentOptions::named("card").facets(["en", "dark"]),
            )
            .expect("key");
        assert_eq!(key.as_str(), "views:/profiles/{id}:card:en:dark");

        let unnamed = cache
            .key_for(&request(), &FragmentOptions::default())
            .expect("key");
        assert_eq!(unnamed.as_str(), "views:/profiles/{id}");
    }

    #[tokio::test]
    async fn compute_runs_once_per_key() {
        let (_, cache) = fragments();
        let calls = AtomicUsize::new(0);
        let tally = &calls;

        for _ in 0..3 {
            let body = cache
                .render_cached(&request(), FragmentOptions::named("card"), move || async move {
                    tally.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(Bytes::from("<div>card</div>"))
                })
                .await
                .expect("render");
            assert_eq!(body, Bytes::from("<div>card</div>"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fragment_expires_after_timeout() {
        let (_, cache) = fragments();
        let calls = AtomicUsize::new(0);
        let options = FragmentOptions::named("card").timeout(Duration::from_secs(5));

        let tally = &calls;
        let render = move || async move {
            tally.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(Bytes::from("card"))
        };
        cache
            .render_cached(&request(), options.clone(), render)
            .await
            .expect("first render");
        tokio::time::advance(Duration::from_secs(6)).await;
        cache
            .render_cached(&request(), options, render)
            .await
            .expect("second render");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_compute_stores_nothing() {
        let (store, cache) = fragments();

        #[derive(Debug)]
        enum RenderError {
            Template,
            Cache,
        }
        impl From<CacheError> for RenderError {
            fn from(_: CacheError) -> Self {
                Self::Cache
            }
        }

        let result = cache
            .render_cached(&request(), FragmentOptions::named("card"), || async {
                Err::<Bytes, _>(RenderError::Template)
            })
            .await;
        assert!(matches!(result, Err(RenderError::Template)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn model_fragment_tags_untagged_objects_and_follows_rotation() {
        let (_, cache) = fragments();
        let objects = SavedProfiles::default();
        let mut profile = Profile::new(42, "Alice", "alice@example.com", "");
        let calls = AtomicUsize::new(0);

        let tally = &calls;
        let render = move || async move {
            tally.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(Bytes::from("card"))
        };

        cache
            .render_cached_for(&request(), &mut profile, &objects, FragmentOptions::named("card"), render)
            .await
            .expect("first render");
        let first_tag = profile.cache_key.clone().expect("tag assigned");
        assert_eq!(objects.0.lock().expect("lock").len(), 1);

        cache
            .render_cached_for(&request(), &mut profile, &objects, FragmentOptions::named("card"), render)
            .await
            .expect("cached render");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(profile.cache_key.as_ref(), Some(&first_tag));

        cache.versions.refresh(&mut profile).await.expect("refresh");
        cache
            .render_cached_for(&request(), &mut profile, &objects, FragmentOptions::named("card"), render)
            .await
            .expect("render after rotation");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn braces_in_tags_are_literal() {
        assert_eq!(escape_template("{a}:1.000001"), "{{a}}:1.000001");
    }
}
