//! Multipart upload state machine, generic over how a backend stages part
//! bytes (in-memory `Bytes` for [`crate::memory::MemObjectStore`], a staged
//! file path for [`crate::fs::FsObjectStore`]).

use dashmap::DashMap;
use s3pit_common::error::Error;
use std::time::{SystemTime, UNIX_EPOCH};

/// One staged part: its ETag, size, and backend-specific payload.
#[derive(Clone, Debug)]
pub struct PartRecord<P> {
    pub etag: String,
    pub size: u64,
    pub payload: P,
}

struct UploadEntry<P> {
    bucket: String,
    key: String,
    parts: DashMap<u32, PartRecord<P>>,
}

/// Tracks open multipart uploads keyed by upload-id.
///
/// States: `open -> (open | open)* -> completed | aborted`. `completed`
/// and `aborted` are represented by removal of the entry rather than an
/// explicit variant — once gone, the coordinator has nothing left to say
/// about that upload-id.
pub struct MultipartCoordinator<P> {
    uploads: DashMap<String, UploadEntry<P>>,
}

impl<P: Clone> MultipartCoordinator<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uploads: DashMap::new(),
        }
    }

    /// Start a new upload, returning its id.
    pub fn initiate(&self, bucket: &str, key: &str) -> String {
        let upload_id = generate_upload_id(key);
        self.uploads.insert(
            upload_id.clone(),
            UploadEntry {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: DashMap::new(),
            },
        );
        upload_id
    }

    /// Stage or replace part `part_number` (1..=10000) on an open upload.
    pub fn put_part(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        part_number: u32,
        record: PartRecord<P>,
    ) -> Result<(), Error> {
        if !(1..=10_000).contains(&part_number) {
            return Err(Error::PartNotFound(part_number));
        }
        let entry = self
            .uploads
            .get(upload_id)
            .ok_or_else(|| Error::UploadNotFound(upload_id.to_string()))?;
        validate_owner(&entry, bucket, key, upload_id)?;
        entry.parts.insert(part_number, record);
        Ok(())
    }

    /// List currently staged parts, ascending by part number.
    pub fn list_parts(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<(u32, PartRecord<P>)>, Error> {
        let entry = self
            .uploads
            .get(upload_id)
            .ok_or_else(|| Error::UploadNotFound(upload_id.to_string()))?;
        validate_owner(&entry, bucket, key, upload_id)?;
        let mut parts: Vec<(u32, PartRecord<P>)> = entry
            .parts
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect();
        parts.sort_by_key(|(n, _)| *n);
        Ok(parts)
    }

    /// Complete the upload: verify every listed part number exists, then
    /// remove and return the parts in ascending part-number order so the
    /// caller can concatenate and persist the final object.
    pub fn complete(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        part_numbers: &[u32],
    ) -> Result<Vec<PartRecord<P>>, Error> {
        let (_, entry) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Error::UploadNotFound(upload_id.to_string()))?;
        if let Err(e) = validate_owner(&entry, bucket, key, upload_id) {
            self.uploads.insert(upload_id.to_string(), entry);
            return Err(e);
        }

        let mut sorted_numbers = part_numbers.to_vec();
        sorted_numbers.sort_unstable();

        let mut records = Vec::with_capacity(sorted_numbers.len());
        for n in &sorted_numbers {
            let record = entry
                .parts
                .get(n)
                .ok_or(Error::PartNotFound(*n))?
                .clone();
            records.push(record);
        }
        Ok(records)
    }

    /// Discard all staged parts and the entry.
    pub fn abort(&self, upload_id: &str, bucket: &str, key: &str) -> Result<(), Error> {
        let entry = self
            .uploads
            .get(upload_id)
            .ok_or_else(|| Error::UploadNotFound(upload_id.to_string()))?;
        validate_owner(&entry, bucket, key, upload_id)?;
        drop(entry);
        self.uploads.remove(upload_id);
        Ok(())
    }
}

impl<P: Clone> Default for MultipartCoordinator<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_owner<P>(entry: &UploadEntry<P>, bucket: &str, key: &str, upload_id: &str) -> Result<(), Error> {
    if entry.bucket != bucket || entry.key != key {
        return Err(Error::UploadMismatch(upload_id.to_string()));
    }
    Ok(())
}

/// `upload-<monotonic-nanos>-<key>`, matching the persisted directory
/// naming under `.s3pit_uploads/`.
fn generate_upload_id(key: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    format!("upload-{nanos}-{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(etag: &str, size: u64) -> PartRecord<Vec<u8>> {
        PartRecord {
            etag: etag.to_string(),
            size,
            payload: vec![0u8; size as usize],
        }
    }

    #[test]
    fn initiate_then_complete_happy_path() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let upload_id = coord.initiate("b1", "big");

        coord
            .put_part(&upload_id, "b1", "big", 1, record("etag1", 3))
            .unwrap();
        coord
            .put_part(&upload_id, "b1", "big", 2, record("etag2", 3))
            .unwrap();

        let parts = coord.complete(&upload_id, "b1", "big", &[1, 2]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].etag, "etag1");
        assert_eq!(parts[1].etag, "etag2");

        // Entry is gone after completion.
        assert!(matches!(
            coord.list_parts(&upload_id, "b1", "big"),
            Err(Error::UploadNotFound(_))
        ));
    }

    #[test]
    fn complete_rejects_missing_part() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let upload_id = coord.initiate("b1", "big");
        coord
            .put_part(&upload_id, "b1", "big", 1, record("etag1", 3))
            .unwrap();

        let err = coord.complete(&upload_id, "b1", "big", &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::PartNotFound(2)));
    }

    #[test]
    fn mismatched_bucket_or_key_is_rejected() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let upload_id = coord.initiate("b1", "big");

        let err = coord
            .put_part(&upload_id, "other-bucket", "big", 1, record("etag1", 3))
            .unwrap_err();
        assert!(matches!(err, Error::UploadMismatch(_)));
    }

    #[test]
    fn unknown_upload_id_is_not_found() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let err = coord.abort("nope", "b1", "big").unwrap_err();
        assert!(matches!(err, Error::UploadNotFound(_)));
    }

    #[test]
    fn abort_discards_entry() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let upload_id = coord.initiate("b1", "big");
        coord.abort(&upload_id, "b1", "big").unwrap();
        assert!(matches!(
            coord.list_parts(&upload_id, "b1", "big"),
            Err(Error::UploadNotFound(_))
        ));
    }

    #[test]
    fn complete_reorders_out_of_order_part_numbers() {
        let coord = MultipartCoordinator::<Vec<u8>>::new();
        let upload_id = coord.initiate("b1", "big");
        coord
            .put_part(&upload_id, "b1", "big", 2, record("etag2", 3))
            .unwrap();
        coord
            .put_part(&upload_id, "b1", "big", 1, record("etag1", 3))
            .unwrap();

        let parts = coord.complete(&upload_id, "b1", "big", &[2, 1]).unwrap();
        assert_eq!(parts[0].etag, "etag1");
        assert_eq!(parts[1].etag, "etag2");
    }
}
