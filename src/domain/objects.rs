//! Object store collaborator and its observer registration API.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::DomainError;
use super::model::Model;

/// Persistence for one model type.
#[async_trait]
pub trait ObjectStore<M: Model>: Send + Sync {
    async fn get(&self, pk: &M::Id) -> Result<Option<M>, DomainError>;

    async fn save(&self, object: &M) -> Result<(), DomainError>;
}

/// Callback run by an observable store around writes.
///
/// Hooks receive the store itself so they can persist follow-up changes
/// without holding a reference back to it.
#[async_trait]
pub trait ModelHook<M: Model>: Send + Sync {
    async fn call(&self, objects: &dyn ObjectStore<M>, object: &mut M) -> Result<(), DomainError>;
}

/// An object store that lets callers observe inserts and updates.
pub trait ObservableObjectStore<M: Model>: ObjectStore<M> {
    /// Run `hook` after a new object has been written.
    fn on_inserted(&self, hook: Arc<dyn ModelHook<M>>);

    /// Run `hook` right before an update is written; changes the hook makes
    /// to the object are persisted by that same write.
    fn on_before_update(&self, hook: Arc<dyn ModelHook<M>>);
}
