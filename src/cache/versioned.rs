//! Versioned object keys and attribute snapshots.
//!
//! Every refresh stamps a model with a fresh [`VersionTag`]. Keys derived
//! from the tag become unreachable once it changes, so derived caches are
//! invalidated without deleting anything. The same refresh rewrites the
//! model's attribute snapshot, which partial proxies read from.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::domain::{DomainError, Model, ModelHook, ObjectStore, ObservableObjectStore};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::KeyParts;
use super::proxy::{PartialObjectProxy, Snapshot};
use super::store::{KeyValueStore, StoreError};

const SNAPSHOT_PREFIX: &str = "models_attrs";
const MICROS_PER_SECOND: u64 = 1_000_000;

/// `<pk>:<seconds>.<micros>`; embedded in derived cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    /// Rehydrate a tag read back from persistence.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VersionTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&VersionTag> for KeyParts {
    fn from(value: &VersionTag) -> Self {
        KeyParts::from(value.as_str())
    }
}

/// Hash key holding a model's attribute snapshot.
pub fn snapshot_key(model: &str, pk: impl Display) -> String {
    format!("{SNAPSHOT_PREFIX}:{model}:{pk}")
}

/// Issues version tags and maintains attribute snapshots.
pub struct VersionedKeyStore {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    last_issued_micros: AtomicU64,
}

impl VersionedKeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            last_issued_micros: AtomicU64::new(0),
        }
    }

    /// Build a tag for `pk` from the current time.
    ///
    /// Timestamps are strictly increasing per store, so two tags issued in
    /// the same microsecond still differ.
    pub fn issue_tag(&self, pk: impl Display) -> VersionTag {
        let micros = self.next_micros();
        VersionTag(format!(
            "{pk}:{}.{:06}",
            micros / MICROS_PER_SECOND,
            micros % MICROS_PER_SECOND
        ))
    }

    fn next_micros(&self) -> u64 {
        let now = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000)
            .unwrap_or_default();
        let mut last = self.last_issued_micros.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_issued_micros.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Assign a new tag and rewrite the snapshot, without persisting the
    /// object. Used right before an update the caller is about to save.
    #[instrument(skip_all, fields(model = M::NAME, pk = %object.pk()))]
    pub async fn refresh<M: Model>(&self, object: &mut M) -> Result<VersionTag, CacheError> {
        let tag = self.issue_tag(object.pk());
        object.set_version_tag(tag.clone());
        self.snapshot_attributes(object).await?;
        debug!(tag = %tag, "version tag rotated");
        Ok(tag)
    }

    /// [`refresh`](Self::refresh), then persist through `objects`.
    pub async fn refresh_and_save<M: Model>(
        &self,
        object: &mut M,
        objects: &dyn ObjectStore<M>,
    ) -> Result<VersionTag, CacheError> {
        let tag = self.refresh(object).await?;
        objects.save(object).await?;
        Ok(tag)
    }

    async fn snapshot_attributes<M: Model>(&self, object: &M) -> Result<(), CacheError> {
        let attrs = self.config.snapshot_attrs(M::NAME);
        if attrs.is_empty() {
            return Ok(());
        }

        let fields = attrs
            .iter()
            .map(|name| {
                object
                    .field(name)
                    .map(|value| (name.clone(), value.to_string()))
                    .ok_or_else(|| DomainError::unknown_field(M::NAME, name.as_str()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let key = snapshot_key(M::NAME, object.pk());
        // Snapshots are replaced wholesale so dropped attributes do not linger.
        self.store.delete(&key).await?;
        self.store.hmset(&key, &fields).await?;
        debug!(key = %key, fields = fields.len(), "attribute snapshot written");
        Ok(())
    }

    pub async fn get_snapshot<M: Model>(&self, pk: &M::Id) -> Result<Snapshot, StoreError> {
        self.get_snapshot_by_name(M::NAME, pk).await
    }

    /// Read a snapshot by model name. Missing snapshots are empty; fields
    /// that are not valid JSON come back as strings.
    pub async fn get_snapshot_by_name(
        &self,
        model: &str,
        pk: impl Display,
    ) -> Result<Snapshot, StoreError> {
        let raw = self.store.hgetall(&snapshot_key(model, pk)).await?;
        Ok(raw
            .into_iter()
            .map(|(field, encoded)| {
                let value = serde_json::from_str(&encoded).unwrap_or(Value::String(encoded));
                (field, value)
            })
            .collect())
    }

    /// Proxy answering reads from the snapshot until a full load is needed.
    pub async fn get_partial_proxy<M: Model>(
        &self,
        pk: M::Id,
        objects: Arc<dyn ObjectStore<M>>,
    ) -> Result<PartialObjectProxy<M>, StoreError> {
        let snapshot = self.get_snapshot::<M>(&pk).await?;
        Ok(PartialObjectProxy::new(pk, snapshot, objects))
    }

    /// Subscribe to `objects` so inserts and updates rotate version tags.
    ///
    /// Returns `false` (and registers nothing) when `auto_model_cache_key`
    /// is disabled.
    pub fn install_hooks<M: Model>(
        self: &Arc<Self>,
        objects: &dyn ObservableObjectStore<M>,
    ) -> bool {
        if !self.config.auto_model_cache_key {
            debug!(model = M::NAME, "automatic version tags disabled");
            return false;
        }
        objects.on_inserted(Arc::new(RefreshOnInsert(Arc::clone(self))));
        objects.on_before_update(Arc::new(RefreshBeforeUpdate(Arc::clone(self))));
        debug!(model = M::NAME, "version tag hooks installed");
        true
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

struct RefreshOnInsert(Arc<VersionedKeyStore>);

#[async_trait]
impl<M: Model> ModelHook<M> for RefreshOnInsert {
    async fn call(&self, objects: &dyn ObjectStore<M>, object: &mut M) -> Result<(), DomainError> {
        self.0
            .refresh_and_save(object, objects)
            .await
            .map(drop)
            .map_err(|err| DomainError::hook("refresh_on_insert", err))
    }
}

struct RefreshBeforeUpdate(Arc<VersionedKeyStore>);

#[async_trait]
impl<M: Model> ModelHook<M> for RefreshBeforeUpdate {
    async fn call(&self, _objects: &dyn ObjectStore<M>, object: &mut M) -> Result<(), DomainError> {
        self.0
            .refresh(object)
            .await
            .map(drop)
            .map_err(|err| DomainError::hook("refresh_before_update", err))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::cache::keys::CacheKey;
    use crate::cache::store::MemoryStore;
    use crate::domain::Profile;

    fn config_with_attrs(attrs: &[&str]) -> CacheConfig {
        CacheConfig {
            cache_model_attrs: HashMap::from([(
                "Profile".to_string(),
                attrs.iter().map(|attr| attr.to_string()).collect(),
            )]),
            ..Default::default()
        }
    }

    fn versions(attrs: &[&str]) -> (Arc<MemoryStore>, VersionedKeyStore) {
        let store = Arc::new(MemoryStore::default());
        let versions = VersionedKeyStore::new(store.clone(), config_with_attrs(attrs));
        (store, versions)
    }

    #[test]
    fn tag_has_pk_and_fractional_timestamp() {
        let (_, versions) = versions(&[]);
        let tag = versions.issue_tag(42);
        let (pk, stamp) = tag.as_str().split_once(':').expect("pk prefix");
        assert_eq!(pk, "42");
        let (secs, micros) = stamp.split_once('.').expect("fractional part");
        assert!(secs.parse::<u64>().expect("seconds") > 0);
        assert_eq!(micros.len(), 6);
    }

    #[tokio::test]
    async fn consecutive_refreshes_produce_distinct_tags_and_keys() {
        let (_, versions) = versions(&[]);
        let mut profile = Profile::new(42, "Alice", "alice@example.com", "");

        let first = versions.refresh(&mut profile).await.expect("refresh");
        let second = versions.refresh(&mut profile).await.expect("refresh");

        assert_ne!(first, second);
        assert_eq!(profile.cache_key.as_ref(), Some(&second));

        let first_key = CacheKey::build(&first, Some("fragments".into()), None);
        let second_key = CacheKey::build(&second, Some("fragments".into()), None);
        assert_ne!(first_key, second_key);
    }

    #[tokio::test]
    async fn refresh_writes_configured_attributes_only() {
        let (store, versions) = versions(&["name", "email"]);
        let mut profile = Profile::new(42, "Alice", "alice@example.com", "long bio");
        versions.refresh(&mut profile).await.expect("refresh");

        let raw = store
            .hgetall("models_attrs:Profile:42")
            .await
            .expect("hgetall");
        assert_eq!(raw.len(), 2);
        assert_eq!(raw["name"], "\"Alice\"");

        let snapshot = versions.get_snapshot::<Profile>(&42).await.expect("snapshot");
        assert_eq!(snapshot["email"], Value::from("alice@example.com"));
        assert!(!snapshot.contains_key("bio"));
    }

    #[tokio::test]
    async fn refresh_replaces_previous_snapshot() {
        let store = Arc::new(MemoryStore::default());
        store
            .hmset(
                "models_attrs:Profile:42",
                &[("stale".to_string(), "\"x\"".to_string())],
            )
            .await
            .expect("hmset");

        let versions = VersionedKeyStore::new(store.clone(), config_with_attrs(&["name"]));
        let mut profile = Profile::new(42, "Alice", "alice@example.com", "");
        versions.refresh(&mut profile).await.expect("refresh");

        let snapshot = versions.get_snapshot::<Profile>(&42).await.expect("snapshot");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["name"], Value::from("Alice"));
    }

    #[tokio::test]
    async fn refresh_without_configured_attributes_writes_nothing() {
        let (store, versions) = versions(&[]);
        let mut profile = Profile::new(7, "Bob", "bob@example.com", "");
        versions.refresh(&mut profile).await.expect("refresh");
        assert!(store.is_empty());
        assert!(profile.cache_key.is_some());
    }

    #[tokio::test]
    async fn refresh_rejects_unknown_configured_attribute() {
        let (_, versions) = versions(&["nickname"]);
        let mut profile = Profile::new(7, "Bob", "bob@example.com", "");
        let err = versions.refresh(&mut profile).await.expect_err("unknown attr");
        assert!(matches!(
            err,
            CacheError::Domain(DomainError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn missing_snapshot_is_empty() {
        let (_, versions) = versions(&["name"]);
        let snapshot = versions
            .get_snapshot_by_name("Profile", 404)
            .await
            .expect("snapshot");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn non_json_snapshot_fields_surface_as_strings() {
        let (store, versions) = versions(&[]);
        store
            .hmset(
                "models_attrs:Profile:1",
                &[("name".to_string(), "plain text".to_string())],
            )
            .await
            .expect("hmset");
        let snapshot = versions
            .get_snapshot_by_name("Profile", 1)
            .await
            .expect("snapshot");
        assert_eq!(snapshot["name"], Value::from("plain text"));
    }
}
