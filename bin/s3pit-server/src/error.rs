//! Maps internal [`s3pit_common::error::Error`] values to S3-compatible XML
//! error responses.

use crate::xml::{render, S3ErrorXml};
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use s3pit_common::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A monotonically increasing identifier derived from the current time and
/// a process-local counter, so two requests landing in the same
/// millisecond still get distinct ids.
fn next_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis:x}-{seq:x}")
}

/// Render `err` as the standard S3 XML error body for `resource` (the
/// request path).
#[must_use]
pub fn map_error(err: &Error, resource: &str) -> Response {
    xml_error(err.s3_code(), &err.to_string(), err.http_status(), resource)
}

/// Build an error response directly from an S3 code/message/status,
/// for situations with no backing [`Error`] variant (e.g. denying an
/// unauthenticated write to a public bucket).
#[must_use]
pub fn xml_error(code: &str, message: &str, status: u16, resource: &str) -> Response {
    let body = S3ErrorXml {
        code: code.to_string(),
        message: message.to_string(),
        resource: resource.to_string(),
        request_id: next_request_id(),
        host_id: "s3pit".to_string(),
    };

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(render(&body)))
        .unwrap()
}

/// Deny an unauthenticated write against a bucket matched by a public-bucket
/// pattern: reads bypass auth, writes still require it.
#[must_use]
pub fn public_bucket_write_denied(resource: &str) -> Response {
    xml_error(
        "AccessDenied",
        "public buckets are read-only; writes require authentication",
        403,
        resource,
    )
}
