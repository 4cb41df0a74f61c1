//! The `ObjectStore` contract and the value types shared by every backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use s3pit_common::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default page size for `listObjects` when the caller does not specify one.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Reserved prefix for sidecar files; never surfaced by listing or lookup.
pub const RESERVED_PREFIX: &str = ".s3pit_";

/// Metadata describing a stored object, independent of backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub etag: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// The full result of a `getObject` call: bytes plus metadata.
#[derive(Clone, Debug)]
pub struct GetObjectResult {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
}

/// One bucket entry as returned by `listBuckets`.
#[derive(Clone, Debug)]
pub struct BucketEntry {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// One object entry as returned by `listObjects`.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// The result of a single `listObjects` page.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsResult {
    pub contents: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// One part as returned by `listParts`.
#[derive(Clone, Debug)]
pub struct PartEntry {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub modified: DateTime<Utc>,
}

/// The contract every storage backend implements (§4.2 of the object model).
///
/// All operations that can fail return a typed [`Error`] from
/// `s3pit_common`; callers map it to an S3 XML error via the dispatcher's
/// error mapper.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> Result<bool, Error>;
    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error>;
    async fn list_buckets(&self) -> Result<Vec<BucketEntry>, Error>;
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Result<ObjectMetadata, Error>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectResult, Error>;
    async fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResult, Error>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<ObjectMetadata, Error>;

    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String, Error>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, Error>;

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<ObjectMetadata, Error>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), Error>;

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartEntry>, Error>;
}

/// Lazily-created per-bucket reader/writer locks, shared by every backend.
///
/// A bucket name maps to one [`RwLock<()>`] the first time it is touched;
/// the lock itself guards nothing directly — callers hold its read or
/// write guard for the duration of the operation it protects.
#[derive(Default)]
pub struct BucketLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl BucketLocks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Return the lock for `bucket`, creating it if this is the first
    /// reference. `DashMap::entry` holds its own shard lock only for the
    /// duration of the insert, so this never contends with in-flight
    /// readers/writers holding the returned `RwLock`.
    pub fn get_or_create(&self, bucket: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drop the lock entry for a deleted bucket (see design note on lock
    /// cardinality: entries are not bounded otherwise).
    pub fn remove(&self, bucket: &str) {
        self.locks.remove(bucket);
    }
}

/// Compute the quoted-hex-MD5 ETag for a byte slice.
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}
