//! Application services and their wiring.

pub mod error;
pub mod profiles;

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheConfig, FragmentCache, KeyValueStore, RequestCache, VersionedKeyStore};
use crate::domain::Profile;
use crate::infra::objects::MemoryObjectStore;

use self::error::AppError;
use self::profiles::ProfileService;

/// Everything the HTTP layer needs, built over one key-value store.
#[derive(Clone)]
pub struct Services {
    pub requests: Arc<RequestCache>,
    pub profiles: Arc<ProfileService>,
}

impl Services {
    pub fn build(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let versions = Arc::new(VersionedKeyStore::new(store.clone(), config.clone()));
        let requests = Arc::new(RequestCache::new(store.clone(), config.clone()));
        let fragments = FragmentCache::new(store, versions.clone(), config);

        let objects = Arc::new(MemoryObjectStore::<Profile>::new());
        versions.install_hooks::<Profile>(objects.as_ref());

        let profiles = Arc::new(ProfileService::new(
            objects,
            versions,
            requests.clone(),
            fragments,
        ));
        Self { requests, profiles }
    }

    /// Insert the demo profiles.
    pub async fn seed(&self) -> Result<(), AppError> {
        let seed = [
            Profile::new(1, "Ada Lovelace", "ada@example.com", "Wrote the first program."),
            Profile::new(2, "Grace Hopper", "grace@example.com", "Found the first bug."),
            Profile::new(3, "Alan Turing", "alan@example.com", "Asked whether machines think."),
        ];
        for profile in seed {
            self.profiles.create(profile).await?;
        }
        info!(count = 3, "demo profiles seeded");
        Ok(())
    }
}
