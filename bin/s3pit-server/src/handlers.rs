//! S3 API handlers: `Query<...Params>` presence flags disambiguate the
//! object URL grammar, and each operation builds one XML (or empty)
//! response.

use crate::error;
use crate::state::AppState;
use crate::xml::{self, *};
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use s3pit_auth::VerifiedIdentity;
use s3pit_common::error::Error;
use s3pit_common::types::{BucketName, ObjectKey};
use s3pit_storage::ObjectStore;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct ListObjectsParams {
    prefix: Option<String>,
    delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    max_keys: Option<u32>,
    #[serde(rename = "continuation-token")]
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BucketPostParams {
    delete: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ObjectParams {
    #[serde(rename = "uploadId")]
    upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    part_number: Option<u32>,
    uploads: Option<String>,
}

async fn store_for(
    state: &AppState,
    identity: &VerifiedIdentity,
    resource: &str,
) -> Result<Arc<dyn ObjectStore>, Response> {
    state
        .store_router
        .get_store_for(&identity.access_key_id)
        .await
        .map_err(|e| error::map_error(&e, resource))
}

/// Reject a bucket name that fails the S3 naming rules before it ever
/// reaches the store.
fn validate_bucket_name(bucket: &str, resource: &str) -> Result<(), Response> {
    BucketName::new(bucket)
        .map(|_| ())
        .map_err(|e| error::map_error(&Error::InvalidBucketName(e.to_string()), resource))
}

/// Reject an object key that fails the S3 key rules before it ever reaches
/// the store.
fn validate_object_key(key: &str, resource: &str) -> Result<(), Response> {
    ObjectKey::new(key)
        .map(|_| ())
        .map_err(|e| error::map_error(&Error::InvalidObjectKey(e.to_string()), resource))
}

/// Create the destination bucket on demand when `AutoCreateBucket` is set
/// and it does not yet exist. Returns whether it just materialized it.
async fn maybe_auto_create(
    store: &dyn ObjectStore,
    bucket: &str,
    auto_create: bool,
) -> Result<bool, Error> {
    if !auto_create || store.bucket_exists(bucket).await? {
        return Ok(false);
    }
    store.create_bucket(bucket).await
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------
// Service / bucket level
// ---------------------------------------------------------------------

pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Response {
    let store = match store_for(&state, &identity, "/").await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store.list_buckets().await {
        Ok(buckets) => {
            let result = ListBucketsResult {
                xmlns: S3_NAMESPACE.to_string(),
                owner: Owner {
                    id: identity.access_key_id.clone(),
                    display_name: identity.access_key_id.clone(),
                },
                buckets: Buckets {
                    bucket: buckets
                        .into_iter()
                        .map(|b| BucketItem {
                            name: b.name,
                            creation_date: b.created.to_rfc3339(),
                        })
                        .collect(),
                },
            };
            xml_response(StatusCode::OK, &result)
        }
        Err(e) => error::map_error(&e, "/"),
    }
}

pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(bucket): Path<String>,
) -> Response {
    let resource = format!("/{bucket}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    let store = match store_for(&state, &identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };
    match store.bucket_exists(&bucket).await {
        Ok(true) => empty(StatusCode::OK),
        Ok(false) => empty(StatusCode::NOT_FOUND),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(bucket): Path<String>,
) -> Response {
    let resource = format!("/{bucket}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    let store = match store_for(&state, &identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };
    match store.create_bucket(&bucket).await {
        Ok(_) => Response::builder()
            .status(StatusCode::OK)
            .header(header::LOCATION, resource)
            .body(Body::empty())
            .unwrap(),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(bucket): Path<String>,
) -> Response {
    let resource = format!("/{bucket}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    let store = match store_for(&state, &identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };
    match store.delete_bucket(&bucket).await {
        Ok(()) => empty(StatusCode::NO_CONTENT),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(bucket): Path<String>,
    Query(params): Query<ListObjectsParams>,
) -> Response {
    list_objects_inner(&state, &identity, &bucket, &params).await
}

async fn list_objects_inner(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    params: &ListObjectsParams,
) -> Response {
    let resource = format!("/{bucket}");
    if let Err(r) = validate_bucket_name(bucket, &resource) {
        return r;
    }
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    let prefix = params.prefix.clone().unwrap_or_default();
    let delimiter = params.delimiter.clone().unwrap_or_default();
    let max_keys = params.max_keys.unwrap_or(s3pit_storage::store::DEFAULT_MAX_KEYS as u32);

    match store
        .list_objects(
            bucket,
            &prefix,
            &delimiter,
            max_keys as usize,
            params.continuation_token.as_deref(),
        )
        .await
    {
        Ok(result) => {
            let xml = xml::list_bucket_result(bucket, &prefix, params.delimiter.clone(), max_keys, &result);
            xml_response(StatusCode::OK, &xml)
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn post_bucket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(bucket): Path<String>,
    Query(params): Query<BucketPostParams>,
    body: Bytes,
) -> Response {
    let resource = format!("/{bucket}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if params.delete.is_some() {
        return batch_delete(&state, &identity, &bucket, &body).await;
    }
    error::xml_error(
        "InvalidRequest",
        "unsupported POST operation on bucket",
        400,
        &resource,
    )
}

async fn batch_delete(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    body: &[u8],
) -> Response {
    let resource = format!("/{bucket}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    let request: DeleteObjectsRequest = match quick_xml::de::from_reader(body) {
        Ok(r) => r,
        Err(e) => {
            return error::xml_error("MalformedXML", &e.to_string(), 400, &resource);
        }
    };

    let mut deleted = Vec::new();
    let mut errors = Vec::new();
    for object in &request.objects {
        if let Err(e) = ObjectKey::new(&object.key) {
            errors.push(DeleteErrorItem {
                key: object.key.clone(),
                code: Error::InvalidObjectKey(e.to_string()).s3_code().to_string(),
                message: e.to_string(),
            });
            continue;
        }
        match store.delete_object(bucket, &object.key).await {
            Ok(()) => deleted.push(DeletedObject {
                key: object.key.clone(),
            }),
            Err(e) => errors.push(DeleteErrorItem {
                key: object.key.clone(),
                code: e.s3_code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    let result = DeleteObjectsResult {
        xmlns: S3_NAMESPACE.to_string(),
        deleted: if request.quiet { Vec::new() } else { deleted },
        errors,
    };
    xml_response(StatusCode::OK, &result)
}

// ---------------------------------------------------------------------
// Object level — dispatch by query/header presence
// ---------------------------------------------------------------------

pub async fn get_object_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
) -> Response {
    if key.is_empty() {
        let list_params = ListObjectsParams::default();
        return list_objects_inner(&state, &identity, &bucket, &list_params).await;
    }
    let resource = format!("/{bucket}/{key}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(&key, &resource) {
        return r;
    }
    if let Some(upload_id) = &params.upload_id {
        return list_parts(&state, &identity, &bucket, &key, upload_id).await;
    }
    get_object(&state, &identity, &bucket, &key).await
}

async fn get_object(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store.get_object(bucket, key).await {
        Ok(result) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, result.metadata.etag)
            .header(header::CONTENT_TYPE, result.metadata.content_type)
            .header(header::CONTENT_LENGTH, result.metadata.size)
            .header(header::LAST_MODIFIED, result.metadata.modified.to_rfc2822())
            .body(Body::from(result.data))
            .unwrap(),
        Err(e) => error::map_error(&e, &resource),
    }
}

async fn list_parts(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store.list_parts(bucket, key, upload_id).await {
        Ok(parts) => {
            let result = ListPartsResult {
                xmlns: S3_NAMESPACE.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                parts: parts.iter().map(PartItem::from).collect(),
            };
            xml_response(StatusCode::OK, &result)
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(&key, &resource) {
        return r;
    }
    let store = match store_for(&state, &identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store.get_object_metadata(&bucket, &key).await {
        Ok(metadata) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, metadata.etag)
            .header(header::CONTENT_TYPE, metadata.content_type)
            .header(header::CONTENT_LENGTH, metadata.size)
            .header(header::LAST_MODIFIED, metadata.modified.to_rfc2822())
            .body(Body::empty())
            .unwrap(),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn put_object_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if key.is_empty() {
        return create_bucket(State(state), Extension(identity), Path(bucket)).await;
    }

    let resource = format!("/{bucket}/{key}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(&key, &resource) {
        return r;
    }

    if let Some(copy_source) = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
    {
        return copy_object(&state, &identity, &bucket, &key, copy_source).await;
    }

    if let (Some(upload_id), Some(part_number)) = (&params.upload_id, params.part_number) {
        return upload_part(&state, &identity, &bucket, &key, upload_id, part_number, body).await;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    put_object(&state, &identity, &bucket, &key, content_type, body).await
}

async fn put_object(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
    content_type: Option<String>,
    body: Bytes,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    let created = match maybe_auto_create(store.as_ref(), bucket, state.auto_create_bucket).await {
        Ok(c) => c,
        Err(e) => return error::map_error(&e, &resource),
    };

    match store.put_object(bucket, key, body, content_type).await {
        Ok(metadata) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::ETAG, metadata.etag);
            if created {
                builder = builder.header("x-s3pit-bucket-created", "true");
            }
            builder.body(Body::empty()).unwrap()
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

async fn copy_object(
    state: &AppState,
    identity: &VerifiedIdentity,
    dst_bucket: &str,
    dst_key: &str,
    copy_source: &str,
) -> Response {
    let resource = format!("/{dst_bucket}/{dst_key}");
    let decoded = percent_decode(copy_source);
    let trimmed = decoded.trim_start_matches('/');
    let Some((src_bucket, src_key)) = trimmed.split_once('/') else {
        return error::xml_error(
            "InvalidArgument",
            "invalid x-amz-copy-source format",
            400,
            &resource,
        );
    };
    if let Err(r) = validate_bucket_name(src_bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(src_key, &resource) {
        return r;
    }

    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store
        .copy_object(src_bucket, src_key, dst_bucket, dst_key)
        .await
    {
        Ok(metadata) => {
            let result = CopyObjectResult {
                xmlns: S3_NAMESPACE.to_string(),
                etag: metadata.etag.clone(),
                last_modified: metadata.modified.to_rfc3339(),
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/xml")
                .header(header::ETAG, metadata.etag)
                .body(Body::from(render(&result)))
                .unwrap()
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

async fn upload_part(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    body: Bytes,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    match store
        .upload_part(bucket, key, upload_id, part_number, body)
        .await
    {
        Ok(etag) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, etag)
            .body(Body::empty())
            .unwrap(),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn delete_object_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(&key, &resource) {
        return r;
    }
    let store = match store_for(&state, &identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    if let Some(upload_id) = &params.upload_id {
        return match store.abort_multipart(&bucket, &key, upload_id).await {
            Ok(()) => empty(StatusCode::NO_CONTENT),
            Err(e) => error::map_error(&e, &resource),
        };
    }

    match store.delete_object(&bucket, &key).await {
        Ok(()) => empty(StatusCode::NO_CONTENT),
        Err(e) => error::map_error(&e, &resource),
    }
}

pub async fn post_object_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
    body: Bytes,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    if let Err(r) = validate_bucket_name(&bucket, &resource) {
        return r;
    }
    if let Err(r) = validate_object_key(&key, &resource) {
        return r;
    }

    if params.uploads.is_some() {
        return initiate_multipart(&state, &identity, &bucket, &key).await;
    }
    if let Some(upload_id) = &params.upload_id {
        return complete_multipart(&state, &identity, &bucket, &key, upload_id, &body).await;
    }
    error::xml_error(
        "InvalidRequest",
        "unsupported POST operation on object",
        400,
        &resource,
    )
}

async fn initiate_multipart(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    if let Err(e) = maybe_auto_create(store.as_ref(), bucket, state.auto_create_bucket).await {
        return error::map_error(&e, &resource);
    }

    match store.initiate_multipart(bucket, key).await {
        Ok(upload_id) => {
            let result = InitiateMultipartUploadResult {
                xmlns: S3_NAMESPACE.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id,
            };
            xml_response(StatusCode::OK, &result)
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

async fn complete_multipart(
    state: &AppState,
    identity: &VerifiedIdentity,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &[u8],
) -> Response {
    let resource = format!("/{bucket}/{key}");
    let store = match store_for(state, identity, &resource).await {
        Ok(s) => s,
        Err(r) => return r,
    };

    let parsed: CompleteMultipartUploadXml = match quick_xml::de::from_reader(body) {
        Ok(p) => p,
        Err(e) => return error::xml_error("MalformedXML", &e.to_string(), 400, &resource),
    };
    let part_numbers: Vec<u32> = parsed.parts.iter().map(|p| p.part_number).collect();

    match store
        .complete_multipart(bucket, key, upload_id, &part_numbers)
        .await
    {
        Ok(metadata) => {
            let result = CompleteMultipartUploadResult {
                xmlns: S3_NAMESPACE.to_string(),
                location: format!("/{bucket}/{key}"),
                bucket: bucket.to_string(),
                key: key.to_string(),
                etag: metadata.etag,
            };
            xml_response(StatusCode::OK, &result)
        }
        Err(e) => error::map_error(&e, &resource),
    }
}

// ---------------------------------------------------------------------
// Shared response helpers
// ---------------------------------------------------------------------

fn xml_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(render(value)))
        .unwrap()
}

fn empty(status: StatusCode) -> Response {
    Response::builder().status(status).body(Body::empty()).unwrap()
}

pub async fn health_check() -> Response {
    empty(StatusCode::OK)
}
