//! Tenant registry: access-key identity, storage root resolution, and
//! public-bucket policy matching.

use s3pit_common::config::{TenantConfig, TenantConfigDocument};
use s3pit_common::error::ConfigError;
use s3pit_common::types::{AccessKeyId, AccessKeyIdError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded tenant: credentials, resolved storage root, and public-bucket
/// patterns. Immutable after load; lifetime is the process.
#[derive(Clone, Debug)]
pub struct TenantRecord {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub storage_root: PathBuf,
    pub description: Option<String>,
    /// Ordered list of literal names or `prefix*` globs.
    pub public_buckets: Vec<String>,
}

/// In-memory mapping from access-key identifier to [`TenantRecord`].
/// Read-mostly; guarded by a reader/writer lock.
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, TenantRecord>>,
}

impl TenantRegistry {
    /// Build an empty registry (used by tests and the `add_tenant` path).
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and load a tenant registry from a configuration document.
    pub fn load(doc: &TenantConfigDocument) -> Result<Self, ConfigError> {
        if let Some(global_dir) = &doc.global_dir {
            if !is_absolute_or_tilde(global_dir) {
                return Err(ConfigError::InvalidGlobalDir(global_dir.clone()));
            }
        }

        let registry = Self::new();
        let mut seen = std::collections::HashSet::new();

        for tenant in &doc.tenants {
            validate_tenant(tenant, doc.global_dir.as_deref())?;
            if !seen.insert(tenant.access_key_id.clone()) {
                return Err(ConfigError::DuplicateAccessKey(
                    tenant.access_key_id.clone(),
                ));
            }
            let record = build_record(tenant, doc.global_dir.as_deref());
            info!(access_key = %record.access_key_id, "loaded tenant");
            registry
                .tenants
                .write()
                .insert(record.access_key_id.clone(), record);
        }

        Ok(registry)
    }

    /// Constant-time-irrelevant mapping lookup (hash map, not secret
    /// comparison — the actual signature check is constant time).
    #[must_use]
    pub fn lookup(&self, access_key: &str) -> Option<TenantRecord> {
        self.tenants.read().get(access_key).cloned()
    }

    /// Resolve the storage root path for a given access key, if registered.
    #[must_use]
    pub fn resolve_storage_root(&self, access_key: &str) -> Option<PathBuf> {
        self.lookup(access_key).map(|t| t.storage_root)
    }

    /// Check whether `bucket` matches any tenant's public-bucket pattern
    /// list. Tenants are scanned in an unspecified but stable order
    /// (insertion order of the underlying map is not guaranteed by
    /// `HashMap`, so callers should not rely on which tenant wins when two
    /// tenants both publish a matching pattern for the same bucket name —
    /// only that *a* match wins).
    #[must_use]
    pub fn is_public_bucket(&self, bucket: &str) -> Option<String> {
        let tenants = self.tenants.read();
        for (access_key, record) in tenants.iter() {
            if record
                .public_buckets
                .iter()
                .any(|pattern| pattern_matches(pattern, bucket))
            {
                debug!(%bucket, %access_key, "bucket matched public pattern");
                return Some(access_key.clone());
            }
        }
        None
    }

    /// Snapshot of all registered tenants, for administrative views.
    #[must_use]
    pub fn list_all_tenants(&self) -> Vec<TenantRecord> {
        self.tenants.read().values().cloned().collect()
    }

    /// Register a tenant at runtime (tests / future admin surface).
    pub fn add_tenant(&self, tenant: &TenantConfig, global_dir: Option<&str>) -> Result<(), ConfigError> {
        validate_tenant(tenant, global_dir)?;
        let record = build_record(tenant, global_dir);
        self.tenants
            .write()
            .insert(record.access_key_id.clone(), record);
        Ok(())
    }

    /// Remove a tenant at runtime. Any store already memoized for this
    /// tenant by a `TenantStoreRouter` is left orphaned, per the
    /// memoization invariant — in-flight requests must see stable routing.
    pub fn remove_tenant(&self, access_key: &str) -> bool {
        self.tenants.write().remove(access_key).is_some()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_tenant(tenant: &TenantConfig, global_dir: Option<&str>) -> Result<(), ConfigError> {
    AccessKeyId::new(&tenant.access_key_id).map_err(|e: AccessKeyIdError| {
        ConfigError::InvalidAccessKeyId(format!("{}: {e}", tenant.access_key_id))
    })?;

    if tenant.secret_access_key.is_empty() {
        return Err(ConfigError::EmptySecret(tenant.access_key_id.clone()));
    }

    match &tenant.custom_dir {
        Some(dir) if !is_absolute_or_tilde(dir) => {
            return Err(ConfigError::InvalidCustomDir(
                tenant.access_key_id.clone(),
                dir.clone(),
            ));
        }
        None if global_dir.is_none() => {
            return Err(ConfigError::MissingGlobalDir(tenant.access_key_id.clone()));
        }
        _ => {}
    }

    Ok(())
}

fn build_record(tenant: &TenantConfig, global_dir: Option<&str>) -> TenantRecord {
    let storage_root = match &tenant.custom_dir {
        Some(dir) => expand_tilde(dir),
        None => {
            let root = global_dir.expect("validated: global dir present when customDir absent");
            expand_tilde(root).join(&tenant.access_key_id)
        }
    };

    TenantRecord {
        access_key_id: tenant.access_key_id.clone(),
        secret_access_key: tenant.secret_access_key.clone(),
        storage_root,
        description: tenant.description.clone(),
        public_buckets: tenant.public_buckets.clone(),
    }
}

fn is_absolute_or_tilde(path: &str) -> bool {
    path.starts_with('~') || Path::new(path).is_absolute()
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Match a public-bucket pattern against a bucket name: exact literal
/// match, the wildcard `"*"`, or a `prefix*` glob.
fn pattern_matches(pattern: &str, bucket: &str) -> bool {
    if pattern == bucket || pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return bucket.starts_with(prefix);
    }
    false
}
