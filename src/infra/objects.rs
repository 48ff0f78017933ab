//! In-memory object store with insert and update hooks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::{DomainError, Model, ModelHook, ObjectStore, ObservableObjectStore};

const SOURCE: &str = "infra::objects";

type Hooks<M> = RwLock<Vec<Arc<dyn ModelHook<M>>>>;

/// Keeps objects keyed by primary key.
///
/// `insert` runs the inserted hooks after the object is written; `update`
/// runs the before-update hooks and then writes whatever they left behind.
pub struct MemoryObjectStore<M: Model> {
    objects: RwLock<HashMap<M::Id, M>>,
    inserted: Hooks<M>,
    before_update: Hooks<M>,
}

impl<M: Model> MemoryObjectStore<M> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            inserted: RwLock::new(Vec::new()),
            before_update: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.objects, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a new object, then run the inserted hooks.
    ///
    /// Returns the object as the hooks left it.
    pub async fn insert(&self, mut object: M) -> Result<M, DomainError> {
        self.write(&object);
        debug!(model = M::NAME, pk = %object.pk(), "object inserted");

        for hook in snapshot_hooks(&self.inserted, "insert") {
            hook.call(self, &mut object).await?;
        }
        Ok(object)
    }

    /// Run the before-update hooks, then write the object.
    pub async fn update(&self, mut object: M) -> Result<M, DomainError> {
        if !rw_read(&self.objects, SOURCE, "update").contains_key(object.pk()) {
            return Err(DomainError::not_found(M::NAME, object.pk()));
        }

        for hook in snapshot_hooks(&self.before_update, "update") {
            hook.call(self, &mut object).await?;
        }

        self.write(&object);
        debug!(model = M::NAME, pk = %object.pk(), "object updated");
        Ok(object)
    }

    fn write(&self, object: &M) {
        rw_write(&self.objects, SOURCE, "write").insert(object.pk().clone(), object.clone());
    }
}

impl<M: Model> Default for MemoryObjectStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

// Hooks are cloned out so no lock is held across their awaits.
fn snapshot_hooks<M: Model>(hooks: &Hooks<M>, op: &'static str) -> Vec<Arc<dyn ModelHook<M>>> {
    rw_read(hooks, SOURCE, op).clone()
}

#[async_trait]
impl<M: Model> ObjectStore<M> for MemoryObjectStore<M> {
    async fn get(&self, pk: &M::Id) -> Result<Option<M>, DomainError> {
        counter!("cachet_object_load_total").increment(1);
        Ok(rw_read(&self.objects, SOURCE, "get").get(pk).cloned())
    }

    async fn save(&self, object: &M) -> Result<(), DomainError> {
        self.write(object);
        Ok(())
    }
}

impl<M: Model> ObservableObjectStore<M> for MemoryObjectStore<M> {
    fn on_inserted(&self, hook: Arc<dyn ModelHook<M>>) {
        rw_write(&self.inserted, SOURCE, "on_inserted").push(hook);
    }

    fn on_before_update(&self, hook: Arc<dyn ModelHook<M>>) {
        rw_write(&self.before_update, SOURCE, "on_before_update").push(hook);
    }
}
