//! Lazy proxy over a partially cached model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{DomainError, Model, ObjectStore};

/// Attribute name to value, as captured at the last version refresh.
pub type Snapshot = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("model `{model}` with id `{id}` not found")]
    NotFound { model: &'static str, id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("failed to encode primary key: {0}")]
    PrimaryKey(#[from] serde_json::Error),
}

enum ProxyState<M> {
    SnapshotOnly(Snapshot),
    Loaded(M),
}

/// Answers field reads from a [`Snapshot`] until a field is missing or a
/// write happens; from then on every access goes to the fully loaded object.
///
/// The primary key is always answered from the stored id. A failed load
/// leaves the proxy in its snapshot state, so the next access retries.
pub struct PartialObjectProxy<M: Model> {
    pk: M::Id,
    state: ProxyState<M>,
    objects: Arc<dyn ObjectStore<M>>,
}

impl<M: Model> PartialObjectProxy<M> {
    pub fn new(pk: M::Id, snapshot: Snapshot, objects: Arc<dyn ObjectStore<M>>) -> Self {
        Self {
            pk,
            state: ProxyState::SnapshotOnly(snapshot),
            objects,
        }
    }

    pub fn pk(&self) -> &M::Id {
        &self.pk
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ProxyState::Loaded(_))
    }

    /// The snapshot, while it is still consulted.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.state {
            ProxyState::SnapshotOnly(snapshot) => Some(snapshot),
            ProxyState::Loaded(_) => None,
        }
    }

    pub async fn get(&mut self, field: &str) -> Result<Value, ProxyError> {
        if field == M::PK_FIELD {
            return Ok(serde_json::to_value(&self.pk)?);
        }

        if let ProxyState::SnapshotOnly(snapshot) = &self.state {
            if let Some(value) = snapshot.get(field) {
                return Ok(value.clone());
            }
        }

        let object = self.load().await?;
        object
            .field(field)
            .ok_or_else(|| DomainError::unknown_field(M::NAME, field).into())
    }

    /// Writes always go to the full object, loading it first.
    pub async fn set(&mut self, field: &str, value: Value) -> Result<(), ProxyError> {
        self.load().await?.set_field(field, value)?;
        Ok(())
    }

    /// Fetch the full object once; later calls reuse it.
    pub async fn load(&mut self) -> Result<&mut M, ProxyError> {
        if let ProxyState::SnapshotOnly(_) = self.state {
            let object = self.fetch().await?;
            self.state = ProxyState::Loaded(object);
        }

        // Borrows only `state`, so the pk stays readable in the else arm.
        let ProxyState::Loaded(object) = &mut self.state else {
            return Err(ProxyError::NotFound {
                model: M::NAME,
                id: self.pk.to_string(),
            });
        };
        Ok(object)
    }

    /// Consume the proxy, loading the object if needed.
    pub async fn into_loaded(self) -> Result<M, ProxyError> {
        match self.state {
            ProxyState::Loaded(object) => Ok(object),
            ProxyState::SnapshotOnly(_) => self.fetch().await,
        }
    }

    async fn fetch(&self) -> Result<M, ProxyError> {
        let object = self
            .objects
            .get(&self.pk)
            .await?
            .ok_or_else(|| self.not_found())?;
        debug!(model = M::NAME, pk = %self.pk, "partial object loaded");
        Ok(object)
    }

    fn not_found(&self) -> ProxyError {
        ProxyError::NotFound {
            model: M::NAME,
            id: self.pk.to_string(),
        }
    }
}

impl<M: Model> fmt::Debug for PartialObjectProxy<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialObjectProxy")
            .field("model", &M::NAME)
            .field("pk", &self.pk.to_string())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::Profile;

    #[derive(Default)]
    struct CountingStore {
        profile: Option<Profile>,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore<Profile> for CountingStore {
        async fn get(&self, pk: &u64) -> Result<Option<Profile>, DomainError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.profile.clone().filter(|profile| profile.id == *pk))
        }

        async fn save(&self, _object: &Profile) -> Result<(), DomainError> {
            Ok(())
        }
    }

    fn alice_store() -> Arc<CountingStore> {
        Arc::new(CountingStore {
            profile: Some(Profile::new(42, "Alice Loaded", "alice@example.com", "")),
            gets: AtomicUsize::new(0),
        })
    }

    fn snapshot() -> Snapshot {
        Snapshot::from([("name".to_string(), Value::from("Alice"))])
    }

    #[tokio::test]
    async fn snapshot_fields_do_not_load() {
        let store = alice_store();
        let mut proxy = PartialObjectProxy::<Profile>::new(42, snapshot(), store.clone());

        assert_eq!(proxy.get("name").await.expect("name"), Value::from("Alice"));
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert!(!proxy.is_loaded());
    }

    #[tokio::test]
    async fn missing_field_loads_once_then_bypasses_snapshot() {
        let store = alice_store();
        let mut proxy = PartialObjectProxy::<Profile>::new(42, snapshot(), store.clone());

        assert_eq!(
            proxy.get("email").await.expect("email"),
            Value::from("alice@example.com")
        );
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        assert_eq!(
            proxy.get("name").await.expect("name"),
            Value::from("Alice Loaded")
        );
        proxy.get("bio").await.expect("bio");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        assert!(proxy.snapshot().is_none());
    }

    #[tokio::test]
    async fn primary_key_never_loads() {
        let store = alice_store();
        let mut proxy = PartialObjectProxy::<Profile>::new(42, Snapshot::new(), store.clone());

        assert_eq!(proxy.get("id").await.expect("id"), Value::from(42u64));
        assert_eq!(*proxy.pk(), 42);
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn writes_force_a_load() {
        let store = alice_store();
        let mut proxy = PartialObjectProxy::<Profile>::new(42, snapshot(), store.clone());

        proxy
            .set("name", Value::from("Alicia"))
            .await
            .expect("set name");
        assert!(proxy.is_loaded());
        assert_eq!(proxy.get("name").await.expect("name"), Value::from("Alicia"));
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        let profile = proxy.into_loaded().await.expect("loaded");
        assert_eq!(profile.name, "Alicia");
    }

    #[tokio::test]
    async fn missing_object_surfaces_on_first_real_access() {
        let store = Arc::new(CountingStore::default());
        let mut proxy = PartialObjectProxy::<Profile>::new(404, snapshot(), store.clone());

        assert_eq!(proxy.get("name").await.expect("name"), Value::from("Alice"));
        let err = proxy.get("email").await.expect_err("not found");
        assert!(matches!(err, ProxyError::NotFound { model: "Profile", .. }));
        assert!(!proxy.is_loaded());

        proxy.get("email").await.expect_err("still not found");
        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn into_loaded_fetches_from_snapshot_state() {
        let store = alice_store();
        let proxy = PartialObjectProxy::<Profile>::new(42, snapshot(), store.clone());
        let profile = proxy.into_loaded().await.expect("loaded");
        assert_eq!(profile.name, "Alice Loaded");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        let missing = PartialObjectProxy::<Profile>::new(7, snapshot(), store);
        assert!(matches!(
            missing.into_loaded().await,
            Err(ProxyError::NotFound { model: "Profile", .. })
        ));
    }

    #[tokio::test]
    async fn unknown_field_on_loaded_object_is_an_error() {
        let store = alice_store();
        let mut proxy = PartialObjectProxy::<Profile>::new(42, Snapshot::new(), store);
        let err = proxy.get("nickname").await.expect_err("unknown field");
        assert!(matches!(
            err,
            ProxyError::Domain(DomainError::UnknownField { .. })
        ));
    }
}
