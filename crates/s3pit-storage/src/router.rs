//! `TenantStoreRouter` — maps an access key to its (possibly newly
//! created) `ObjectStore`, memoizing the result for the life of the
//! process.

use crate::fs::FsObjectStore;
use crate::memory::MemObjectStore;
use crate::store::ObjectStore;
use s3pit_auth::TenantRegistry;
use s3pit_common::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use std::collections::HashMap;
use tracing::info;

/// Sentinel bucket namespace used by administrative paths invoked without
/// authentication (an empty access key).
pub const SENTINEL_ACCESS_KEY: &str = "";
const SENTINEL_DIR_NAME: &str = "default";

/// Which concrete [`ObjectStore`] implementation new tenants get.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Fs,
    Memory,
}

/// Routes an authenticated access key to its `ObjectStore`, creating one
/// on first use and reusing it thereafter.
///
/// Per the memoization invariant: once created, a tenant's store is never
/// destroyed, even if the tenant is later removed from the registry.
pub struct TenantStoreRouter {
    registry: Arc<TenantRegistry>,
    backend: Backend,
    fallback_root: PathBuf,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl TenantStoreRouter {
    #[must_use]
    pub fn new(registry: Arc<TenantRegistry>, backend: Backend, fallback_root: PathBuf) -> Self {
        Self {
            registry,
            backend,
            fallback_root,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Return the store for `access_key`, creating and memoizing one if
    /// this is the first request for that key. An empty access key routes
    /// to the sentinel `"default"` store.
    pub async fn get_store_for(&self, access_key: &str) -> Result<Arc<dyn ObjectStore>, Error> {
        if let Some(store) = self.stores.read().await.get(access_key) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        // Double-checked: another task may have inserted while we waited
        // for the write lock.
        if let Some(store) = stores.get(access_key) {
            return Ok(store.clone());
        }

        let root = if access_key == SENTINEL_ACCESS_KEY {
            self.fallback_root.join(SENTINEL_DIR_NAME)
        } else {
            self.registry
                .resolve_storage_root(access_key)
                .ok_or_else(|| Error::AccessKeyNotFound(access_key.to_string()))?
        };

        info!(access_key, backend = ?self.backend, root = %root.display(), "creating tenant store");

        let store: Arc<dyn ObjectStore> = match self.backend {
            Backend::Fs => Arc::new(FsObjectStore::new(root).await?),
            Backend::Memory => Arc::new(MemObjectStore::new()),
        };

        stores.insert(access_key.to_string(), store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3pit_common::config::{TenantConfig, TenantConfigDocument};

    fn registry(root: &std::path::Path) -> Arc<TenantRegistry> {
        Arc::new(
            TenantRegistry::load(&TenantConfigDocument {
                global_dir: Some(root.to_string_lossy().into_owned()),
                tenants: vec![TenantConfig {
                    access_key_id: "AKID".to_string(),
                    secret_access_key: "secret".to_string(),
                    custom_dir: None,
                    description: None,
                    public_buckets: vec![],
                }],
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn memoizes_store_for_repeat_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantStoreRouter::new(registry(dir.path()), Backend::Memory, dir.path().to_path_buf());

        let a = router.get_store_for("AKID").await.unwrap();
        let b = router.get_store_for("AKID").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_access_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantStoreRouter::new(registry(dir.path()), Backend::Memory, dir.path().to_path_buf());
        let err = router.get_store_for("UNKNOWN").await.unwrap_err();
        assert!(matches!(err, Error::AccessKeyNotFound(_)));
    }

    #[tokio::test]
    async fn sentinel_access_key_routes_to_default_store() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantStoreRouter::new(registry(dir.path()), Backend::Memory, dir.path().to_path_buf());
        let store = router.get_store_for(SENTINEL_ACCESS_KEY).await.unwrap();
        assert!(store.create_bucket("admin-bucket").await.unwrap());
    }
}
