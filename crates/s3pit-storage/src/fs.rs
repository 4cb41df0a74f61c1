//! Filesystem-backed `ObjectStore`.
//!
//! Layout under `root`:
//! ```text
//! <root>/<bucket>/.s3pit_bucket_meta.json
//! <root>/<bucket>/<key>
//! <root>/<bucket>/<key>.s3pit_meta.json
//! <root>/<bucket>/.s3pit_uploads/<uploadId>/part-<N>
//! ```

use crate::multipart::{MultipartCoordinator, PartRecord};
use crate::store::{
    compute_etag, BucketEntry, BucketLocks, GetObjectResult, ListObjectsResult, ObjectEntry,
    ObjectMetadata, ObjectStore, PartEntry, RESERVED_PREFIX,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3pit_common::error::Error;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

const BUCKET_META_FILE: &str = ".s3pit_bucket_meta.json";
const UPLOADS_DIR: &str = ".s3pit_uploads";
const SIDECAR_SUFFIX: &str = ".s3pit_meta.json";

#[derive(serde::Serialize, serde::Deserialize)]
struct BucketMeta {
    name: String,
    created: DateTime<Utc>,
}

/// A filesystem-rooted object store for one tenant.
pub struct FsObjectStore {
    root: PathBuf,
    locks: BucketLocks,
    uploads: MultipartCoordinator<PathBuf>,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory if absent.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::internal(format!("failed to create storage root: {e}")))?;
        Ok(Self {
            root,
            locks: BucketLocks::new(),
            uploads: MultipartCoordinator::new(),
        })
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, Error> {
        validate_key(key)?;
        Ok(self.bucket_path(bucket).join(key))
    }

    fn sidecar_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn write_sidecar(path: &Path, metadata: &ObjectMetadata) {
        let sidecar = Self::sidecar_path(path);
        match serde_json::to_vec(metadata) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&sidecar, bytes).await {
                    warn!(path = %sidecar.display(), error = %e, "failed to write sidecar metadata");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize sidecar metadata"),
        }
    }

    async fn read_metadata(path: &Path) -> Result<ObjectMetadata, Error> {
        let sidecar = Self::sidecar_path(path);
        if let Ok(bytes) = tokio::fs::read(&sidecar).await {
            if let Ok(metadata) = serde_json::from_slice::<ObjectMetadata>(&bytes) {
                return Ok(metadata);
            }
        }
        // Sidecar missing or unreadable: synthesize from the file itself so
        // reads still succeed (put never fails the operation on sidecar
        // write failure).
        let data = tokio::fs::read(path)
            .await
            .map_err(|_| object_not_found(path))?;
        let fs_meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| object_not_found(path))?;
        let modified = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        Ok(ObjectMetadata {
            content_type: "application/octet-stream".to_string(),
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified,
        })
    }

    /// Write `data` atomically at `path`: scratch file in the same
    /// directory, fsync-close, rename onto the final path.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), Error> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::internal("object path has no parent directory"))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::internal(format!("failed to create bucket directory: {e}")))?;

        let scratch = parent.join(format!("{RESERVED_PREFIX}scratch-{}", Uuid::new_v4()));
        let write_result: Result<(), Error> = async {
            let mut file = tokio::fs::File::create(&scratch)
                .await
                .map_err(|e| Error::internal(format!("failed to create scratch file: {e}")))?;
            use tokio::io::AsyncWriteExt;
            file.write_all(data)
                .await
                .map_err(|e| Error::internal(format!("failed to write scratch file: {e}")))?;
            file.sync_all()
                .await
                .map_err(|e| Error::internal(format!("failed to fsync scratch file: {e}")))?;
            Ok(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e);
        }

        tokio::fs::rename(&scratch, path)
            .await
            .map_err(|e| Error::internal(format!("failed to rename scratch file: {e}")))?;
        Ok(())
    }

    async fn read_bucket_names(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::internal(format!("failed to read storage root: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::internal(format!("failed to read storage root entry: {e}")))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::internal(format!("failed to stat entry: {e}")))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(RESERVED_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// List every live object key under a bucket, already percent-decoded,
    /// skipping reserved sidecars/directories.
    async fn walk_keys(bucket_root: &Path) -> Result<Vec<String>, Error> {
        let mut stack = vec![PathBuf::new()];
        let mut keys = Vec::new();

        while let Some(rel_dir) = stack.pop() {
            let abs_dir = bucket_root.join(&rel_dir);
            let mut entries = match tokio::fs::read_dir(&abs_dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::internal(format!("failed to list bucket: {e}"))),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::internal(format!("failed to read bucket entry: {e}")))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(RESERVED_PREFIX) || name.ends_with(SIDECAR_SUFFIX) {
                    continue;
                }
                let rel_path = rel_dir.join(&name);
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::internal(format!("failed to stat bucket entry: {e}")))?;
                if file_type.is_dir() {
                    stack.push(rel_path);
                } else {
                    keys.push(to_key_string(&rel_path));
                }
            }
        }

        Ok(keys)
    }
}

fn to_key_string(rel_path: &Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn validate_key(key: &str) -> Result<(), Error> {
    if key.starts_with('/') {
        return Err(Error::InvalidObjectKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "..")
    {
        return Err(Error::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

fn object_not_found(path: &Path) -> Error {
    Error::ObjectNotFound {
        bucket: String::new(),
        key: path.display().to_string(),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn create_bucket(&self, bucket: &str) -> Result<bool, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        let path = self.bucket_path(bucket);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::internal(format!("failed to create bucket: {e}")))?;

        let meta = BucketMeta {
            name: bucket.to_string(),
            created: Utc::now(),
        };
        if let Ok(bytes) = serde_json::to_vec(&meta) {
            let _ = tokio::fs::write(path.join(BUCKET_META_FILE), bytes).await;
        }
        Ok(true)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        let path = self.bucket_path(bucket);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(Error::BucketNotFound(bucket.to_string()));
        }

        let keys = Self::walk_keys(&path).await?;
        if !keys.is_empty() {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }

        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| Error::internal(format!("failed to remove bucket directory: {e}")))?;
        drop(_guard);
        self.locks.remove(bucket);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketEntry>, Error> {
        let names = self.read_bucket_names().await?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let meta_path = self.bucket_path(&name).join(BUCKET_META_FILE);
            let created = match tokio::fs::read(&meta_path).await {
                Ok(bytes) => serde_json::from_slice::<BucketMeta>(&bytes)
                    .map(|m| m.created)
                    .unwrap_or_else(|_| Utc::now()),
                Err(_) => Utc::now(),
            };
            entries.push(BucketEntry { name, created });
        }
        Ok(entries)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error> {
        Ok(tokio::fs::metadata(self.bucket_path(bucket)).await.is_ok())
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

        let path = self.object_path(bucket, key)?;
        Self::write_atomic(&path, &data).await?;

        let metadata = ObjectMetadata {
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified: Utc::now(),
        };
        Self::write_sidecar(&path, &metadata).await;
        Ok(metadata)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectResult, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;

        let path = self.object_path(bucket, key)?;
        let data = tokio::fs::read(&path).await.map_err(|_| Error::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let metadata = Self::read_metadata(&path).await?;
        Ok(GetObjectResult {
            data: Bytes::from(data),
            metadata,
        })
    }

    async fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;

        let path = self.object_path(bucket, key)?;
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Self::read_metadata(&path).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;

        let path = self.object_path(bucket, key)?;
        let _ = tokio::fs::remove_file(Self::sidecar_path(&path)).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()), // delete is idempotent: missing object is not an error
        }
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

        if tokio::fs::metadata(self.bucket_path(bucket)).await.is_err() {
            return Err(Error::BucketNotFound(bucket.to_string()));
        }

        let mut keys = Self::walk_keys(&self.bucket_path(bucket)).await?;
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

            let path = self.bucket_path(bucket).join(key);
            let metadata = Self::read_metadata(&path).await?;
            contents.push(ObjectEntry {
                key: key.clone(),
                etag: metadata.etag,
                size: metadata.size,
                modified: metadata.modified,
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
        let (data, content_type) = {
            if src_bucket == dst_bucket {
                let lock = self.locks.get_or_create(src_bucket);
                let _guard = lock.write().await;
                let path = self.object_path(src_bucket, src_key)?;
                let data = tokio::fs::read(&path).await.map_err(|_| Error::ObjectNotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                })?;
                let metadata = Self::read_metadata(&path).await?;

                let dst_path = self.object_path(dst_bucket, dst_key)?;
                Self::write_atomic(&dst_path, &data).await?;
                let new_metadata = ObjectMetadata {
                    content_type: metadata.content_type,
                    etag: compute_etag(&data),
                    size: data.len() as u64,
                    modified: Utc::now(),
                };
                Self::write_sidecar(&dst_path, &new_metadata).await;
                return Ok(new_metadata);
            }

            // Distinct buckets: acquire locks in lexicographic order to
            // avoid deadlock against a concurrent reverse-direction copy.
            let (src_guard_holder, dst_guard_holder);
            if src_bucket < dst_bucket {
                let src_lock = self.locks.get_or_create(src_bucket);
                let dst_lock = self.locks.get_or_create(dst_bucket);
                src_guard_holder = src_lock.read().await;
                dst_guard_holder = dst_lock.write().await;
                let path = self.object_path(src_bucket, src_key)?;
                let data = tokio::fs::read(&path).await.map_err(|_| Error::ObjectNotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                })?;
                let content_type = Self::read_metadata(&path).await?.content_type;
                drop(src_guard_holder);
                drop(dst_guard_holder);
                (data, content_type)
            } else {
                let dst_lock = self.locks.get_or_create(dst_bucket);
                let src_lock = self.locks.get_or_create(src_bucket);
                dst_guard_holder = dst_lock.write().await;
                src_guard_holder = src_lock.read().await;
                let path = self.object_path(src_bucket, src_key)?;
                let data = tokio::fs::read(&path).await.map_err(|_| Error::ObjectNotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                })?;
                let content_type = Self::read_metadata(&path).await?.content_type;
                drop(src_guard_holder);
                drop(dst_guard_holder);
                (data, content_type)
            }
        };

        let lock = self.locks.get_or_create(dst_bucket);
        let _guard = lock.write().await;
        let dst_path = self.object_path(dst_bucket, dst_key)?;
        Self::write_atomic(&dst_path, &data).await?;
        let metadata = ObjectMetadata {
            content_type,
            etag: compute_etag(&data),
            size: data.len() as u64,
            modified: Utc::now(),
        };
        Self::write_sidecar(&dst_path, &metadata).await;
        Ok(metadata)
    }

    async fn initiate_multipart(&self, bucket: &str, key: &str) -> Result<String, Error> {
        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.read().await;
        if tokio::fs::metadata(self.bucket_path(bucket)).await.is_err() {
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
        let uploads_dir = self.bucket_path(bucket).join(UPLOADS_DIR).join(upload_id);
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(|e| Error::internal(format!("failed to create upload staging dir: {e}")))?;
        let part_path = uploads_dir.join(format!("part-{part_number}"));

        Self::write_atomic(&part_path, &data).await?;
        let etag = compute_etag(&data);

        self.uploads.put_part(
            upload_id,
            bucket,
            key,
            part_number,
            PartRecord {
                etag: etag.clone(),
                size: data.len() as u64,
                payload: part_path,
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
            let bytes = tokio::fs::read(&record.payload)
                .await
                .map_err(|e| Error::internal(format!("failed to read staged part: {e}")))?;
            assembled.extend_from_slice(&bytes);
        }

        let lock = self.locks.get_or_create(bucket);
        let _guard = lock.write().await;
        let path = self.object_path(bucket, key)?;
        Self::write_atomic(&path, &assembled).await?;

        let metadata = ObjectMetadata {
            content_type: "application/octet-stream".to_string(),
            etag: compute_etag(&assembled),
            size: assembled.len() as u64,
            modified: Utc::now(),
        };
        Self::write_sidecar(&path, &metadata).await;

        let uploads_dir = self.bucket_path(bucket).join(UPLOADS_DIR).join(upload_id);
        let _ = tokio::fs::remove_dir_all(&uploads_dir).await;

        Ok(metadata)
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), Error> {
        self.uploads.abort(upload_id, bucket, key)?;
        let uploads_dir = self.bucket_path(bucket).join(UPLOADS_DIR).join(upload_id);
        let _ = tokio::fs::remove_dir_all(&uploads_dir).await;
        Ok(())
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
