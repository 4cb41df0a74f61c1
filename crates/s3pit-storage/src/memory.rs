//! In-memory `ObjectStore`, for ephemeral/test deployments.
//!
//! Objects are stored as [`Bytes`] behind a [`DashMap`]; a write replaces
//! the whole buffer rather than mutating in place, so a reader holding a
//! prior clone of the `Bytes` continues to see a stable snapshot even
//! while a concurrent write lands.

use crate::multipart::{MultipartCoordinator, PartRecord};
use crate::store::{
    compute_etag, BucketEntry, BucketLocks, GetObjectResult, ListObjectsResult, ObjectEntry,
    ObjectMetadata, ObjectStore, PartEntry,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use s3pit_common::error::Error;
use std::collections::BTreeSet;

struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

struct Bucket {
    created: chrono::DateTime<Utc>,
    objects: DashMap<String, StoredObject>,
}

/// An in-memory object store, one per tenant.
#[derive(Default)]
pub struct MemObjectStore {
    buckets: DashMap<String, Bucket>,
    locks: BucketLocks,
    uploads: MultipartCoordinator<Bytes>,
}

impl MemObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn create_bucket(&self, bucket: &str) -> Result<bool, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        if self.buckets.contains_key(bucket) {
            return Ok(false);
        }
        self.buckets.insert(
            bucket.to_string(),
            Bucket {
                created: Utc::now(),
                objects: DashMap::new(),
            },
        );
        Ok(true)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        let entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        if !entry.objects.is_empty() {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }
        drop(entry);
        self.buckets.remove(bucket);
        drop(_guard);
        self.locks.remove(bucket);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketEntry>, Error> {
        let mut entries: Vec<BucketEntry> = self
            .buckets
            .iter()
            .map(|kv| BucketEntry {
                name: kv.key().clone(),
                created: kv.value().created,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Result<ObjectMetadata, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        let bucket_entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let metadata = ObjectMetadata {
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified: Utc::now(),
        };
        bucket_entry.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectResult, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;

        let bucket_entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let object = bucket_entry
            .objects
            .get(key)
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(GetObjectResult {
            data: object.data.clone(),
            metadata: object.metadata.clone(),
        })
    }

    async fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;

        let bucket_entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let object = bucket_entry
            .objects
            .get(key)
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(object.metadata.clone())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        if let Some(bucket_entry) = self.buckets.get(bucket) {
            bucket_entry.objects.remove(key);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResult, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;

        let bucket_entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let mut keys: Vec<String> = bucket_entry
            .objects
            .iter()
            .map(|kv| kv.key().clone())
            .collect();
        keys.sort();

        let mut contents = Vec::new();
        let mut common_prefixes: BTreeSet<String> = BTreeSet::new();
        let mut truncated_at: Option<String> = None;

        for key in &keys {
            if !prefix.is_empty() && !key.starts_with(prefix) {
                continue;
            }
            if let Some(token) = continuation_token {
                if key.as_str() <= token {
                    continue;
                }
            }

            if !delimiter.is_empty() {
                let after_prefix = &key[prefix.len()..];
                if let Some(pos) = after_prefix.find(delimiter) {
                    let end = prefix.len() + pos + delimiter.len();
                    common_prefixes.insert(key[..end].to_string());
                    continue;
                }
            }

            if contents.len() == max_keys {
                truncated_at = Some(key.clone());
                break;
            }

            let object = bucket_entry.objects.get(key).expect("key from own snapshot");
            contents.push(ObjectEntry {
                key: key.clone(),
                etag: object.metadata.etag.clone(),
                size: object.metadata.size,
                modified: object.metadata.modified,
            });
        }

        let is_truncated = truncated_at.is_some();
        let next_continuation_token = contents.last().map(|e| e.key.clone()).filter(|_| is_truncated);

        Ok(ListObjectsResult {
            contents,
            common_prefixes: common_prefixes.into_iter().collect(),
            next_continuation_token,
            is_truncated,
        })
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<ObjectMetadata, Error> {
        if src_bucket == dst_bucket {
            let lock = self.locks.get_or_create(src_bucket);
            let _guard = lock.write().await;
            return self.copy_within_locked(src_bucket, src_key, dst_bucket, dst_key).await;
        }

        let (src_lock, dst_lock) = (self.locks.get_or_create(src_bucket), self.locks.get_or_create(dst_bucket));
        if src_bucket < dst_bucket {
            let _src_guard = src_lock.read().await;
            let _dst_guard = dst_lock.write().await;
            self.copy_within_locked(src_bucket, src_key, dst_bucket, dst_key).await
        } else {
            let _dst_guard = dst_lock.write().await;
            let _src_guard = src_lock.read().await;
            self.copy_within_locked(src_bucket, src_key, dst_bucket, dst_key).await
        }
    }

    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;
        if !self.buckets.contains_key(bucket) {
            return Err(Error::BucketNotFound(bucket.to_string()));
        }
        Ok(self.uploads.initiate(bucket, key))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, Error> {
        let etag = compute_etag(&data);
        self.uploads.put_part(
            upload_id,
            bucket,
            key,
            part_number,
            PartRecord {
                etag: etag.clone(),
                size: data.len() as u64,
                payload: data,
            },
        )?;
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<ObjectMetadata, Error> {
        let records = self.uploads.complete(upload_id, bucket, key, part_numbers)?;

        let mut assembled = Vec::new();
        for record in &records {
            assembled.extend_from_slice(&record.payload);
        }
        let data = Bytes::from(assembled);

        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;
        let bucket_entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let metadata = ObjectMetadata {
            content_type: "application/octet-stream".to_string(),
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified: Utc::now(),
        };
        bucket_entry.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), Error> {
        self.uploads.abort(upload_id, bucket, key)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartEntry>, Error> {
        let parts = self.uploads.list_parts(upload_id, bucket, key)?;
        Ok(parts
            .into_iter()
            .map(|(part_number, record)| PartEntry {
                part_number,
                size: record.size,
                etag: record.etag,
                modified: Utc::now(),
            })
            .collect())
    }
}

impl MemObjectStore {
    async fn copy_within_locked(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<ObjectMetadata, Error> {
        let (data, content_type) = {
            let src = self
                .buckets
                .get(src_bucket)
                .ok_or_else(|| Error::BucketNotFound(src_bucket.to_string()))?;
            let object = src.objects.get(src_key).ok_or_else(|| Error::ObjectNotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;
            (object.data.clone(), object.metadata.content_type.clone())
        };

        let dst = self
            .buckets
            .get(dst_bucket)
            .ok_or_else(|| Error::BucketNotFound(dst_bucket.to_string()))?;
        let metadata = ObjectMetadata {
            content_type,
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified: Utc::now(),
        };
        dst.objects.insert(
            dst_key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }
}
