//! s3pit-storage - Concurrent object storage backends
//!
//! Implements the [`ObjectStore`] contract against a filesystem-backed
//! [`FsObjectStore`] and an in-memory [`MemObjectStore`], plus the
//! [`TenantStoreRouter`] that maps an authenticated access key to its
//! per-tenant store.

pub mod fs;
pub mod memory;
pub mod multipart;
pub mod router;
pub mod store;

pub use fs::FsObjectStore;
pub use memory::MemObjectStore;
pub use router::{Backend, TenantStoreRouter, SENTINEL_ACCESS_KEY};
pub use store::{
    BucketEntry, GetObjectResult, ListObjectsResult, ObjectEntry, ObjectMetadata, ObjectStore,
    PartEntry,
};
