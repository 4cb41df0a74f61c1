//! Request authentication: SigV4 verification plus public-bucket bypass,
//! with the public-bucket check running before signature verification.

use crate::error;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use s3pit_auth::{payload_sha256, RequestToVerify, VerifiedIdentity};
use std::sync::Arc;

/// Marks a request that was let through on a public-bucket read, so
/// handlers can skip tenant-owner checks that don't apply to it.
#[derive(Clone, Copy)]
pub struct PublicAccess;

fn bypasses_auth(path: &str) -> bool {
    path == "/health" || path.starts_with("/dashboard") || path.starts_with("/static/")
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn collect_headers(headers: &axum::http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// Matches the router's own `DefaultBodyLimit`; this middleware runs ahead
/// of that layer, so it enforces the same ceiling itself when it has to
/// buffer a body to hash it.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

fn first_path_segment(path: &str) -> Option<String> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub async fn s3_auth_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if bypasses_auth(&path) {
        return next.run(request).await;
    }

    let query_pairs = parse_query_pairs(request.uri().query().unwrap_or(""));
    let headers = collect_headers(request.headers());
    let has_credentials = headers.iter().any(|(k, _)| k == "authorization")
        || query_pairs.iter().any(|(k, _)| k == "X-Amz-Signature");

    if let Some(bucket) = first_path_segment(&path) {
        if let Some(owner_key) = state.registry.is_public_bucket(&bucket) {
            let method = request.method().clone();
            if method == Method::GET || method == Method::HEAD {
                request
                    .extensions_mut()
                    .insert(VerifiedIdentity { access_key_id: owner_key });
                request.extensions_mut().insert(PublicAccess);
                return next.run(request).await;
            }
            if !has_credentials {
                return error::public_bucket_write_denied(&path);
            }
            // Credentials were supplied for a write against a public
            // bucket: fall through to ordinary verification below so the
            // owning tenant can still manage its own bucket.
        }
    }

    let is_presigned = query_pairs.iter().any(|(k, _)| k == "X-Amz-Signature");
    let header_hash = headers
        .iter()
        .find(|(k, _)| k == "x-amz-content-sha256")
        .map(|(_, v)| v.clone());

    // Presigned requests may legitimately omit the body hash (clients
    // commonly sign `UNSIGNED-PAYLOAD`), but a header-signed request with no
    // hash header must have its body hashed here so the signature actually
    // covers it; the body is then restored for the handler downstream.
    let (payload_hash, mut request) = match header_hash {
        Some(hash) => (hash, request),
        None if is_presigned => ("UNSIGNED-PAYLOAD".to_string(), request),
        None => {
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(b) => b,
                Err(e) => {
                    return error::xml_error("InvalidRequest", &e.to_string(), 400, &path);
                }
            };
            let hash = payload_sha256(&bytes);
            (hash, Request::from_parts(parts, Body::from(bytes)))
        }
    };

    let req = RequestToVerify {
        method: request.method().as_str(),
        path: request.uri().path(),
        query: &query_pairs,
        headers: &headers,
        payload_hash: &payload_hash,
    };

    let result = if is_presigned {
        state.verifier.verify_presigned(&state.registry, &req)
    } else {
        state.verifier.verify_header(&state.registry, &req)
    };

    match result {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => error::map_error(&e, &path),
    }
}
