//! Shared scaffolding for the end-to-end HTTP tests: a throwaway tenant
//! registry plus a from-scratch SigV4 header signer (mirroring the
//! server's own canonicalisation so the two sides must independently
//! agree, the way a real client's signer would).

use chrono::Utc;
use hmac::{Hmac, Mac};
use s3pit_common::config::{TenantConfig, TenantConfigDocument};
use s3pit_server::state::AppState;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const ACCESS_KEY: &str = "AKIDTEST";
pub const SECRET_KEY: &str = "testsecret1234";
pub const REGION: &str = "us-east-1";

/// Build an `AppState` backed by a fresh temp directory, with one tenant
/// (`ACCESS_KEY`/`SECRET_KEY`) and `public-*` registered as a public-bucket
/// pattern. The returned `TempDir` must be kept alive for the store's
/// lifetime.
pub async fn test_state(auto_create_bucket: bool) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let doc = TenantConfigDocument {
        global_dir: Some(dir.path().to_string_lossy().into_owned()),
        tenants: vec![TenantConfig {
            access_key_id: ACCESS_KEY.to_string(),
            secret_access_key: SECRET_KEY.to_string(),
            custom_dir: None,
            description: None,
            public_buckets: vec!["public-*".to_string()],
        }],
    };
    let registry = Arc::new(s3pit_auth::TenantRegistry::load(&doc).unwrap());
    let store_router = Arc::new(s3pit_storage::TenantStoreRouter::new(
        registry.clone(),
        s3pit_storage::Backend::Fs,
        dir.path().to_path_buf(),
    ));
    let verifier = Arc::new(s3pit_auth::SigV4Verifier::new(REGION));

    let state = Arc::new(AppState {
        registry,
        store_router,
        verifier,
        auto_create_bucket,
        delay: Default::default(),
    });

    (state, dir)
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, scope_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// The headers a signed request needs: `host`, `x-amz-date`,
/// `x-amz-content-sha256` and `authorization`, in that order so tests can
/// push them straight onto a `http::request::Builder`.
pub struct SignedHeaders {
    pub host: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: String,
    pub authorization: String,
}

fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex_str) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex_str, 16) {
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

fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Canonicalise a raw `key=value&...` query string the same way the
/// server does: percent-decode then re-encode each pair, sorted by key.
fn canonical_query_string(raw_query: &str) -> String {
    let mut pairs: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();
    for part in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        pairs.insert(url_encode(&url_decode(k)), url_encode(&url_decode(v)));
    }
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a request the way a SigV4 client would. `path` is the raw URI
/// path (no query); `raw_query` is the raw `key=value&...` query string
/// (empty if none). Signs over `host`, `x-amz-content-sha256` and
/// `x-amz-date`, all three sent on the wire.
#[must_use]
pub fn sign(method: &str, path: &str, raw_query: &str, body: &[u8]) -> SignedHeaders {
    let payload_hash = sha256_hex(body);
    let (host, amz_date, authorization) =
        sign_core(method, path, raw_query, &payload_hash, true);
    SignedHeaders {
        host,
        x_amz_date: amz_date,
        x_amz_content_sha256: payload_hash,
        authorization,
    }
}

/// Sign a request the way a client omitting `x-amz-content-sha256` would:
/// the real body hash is still folded into the signature (it's always the
/// canonical request's payload-hash line), but it is not one of the
/// `SignedHeaders` and the header itself is never sent. Returns
/// `(host, x-amz-date, authorization)` for building the request directly,
/// deliberately without a `x_amz_content_sha256` field to send.
#[must_use]
pub fn sign_without_content_hash_header(
    method: &str,
    path: &str,
    raw_query: &str,
    body: &[u8],
) -> (String, String, String) {
    let payload_hash = sha256_hex(body);
    sign_core(method, path, raw_query, &payload_hash, false)
}

fn sign_core(
    method: &str,
    path: &str,
    raw_query: &str,
    payload_hash: &str,
    include_content_hash_header: bool,
) -> (String, String, String) {
    let host = "localhost:9000".to_string();
    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope_date = now.format("%Y%m%d").to_string();

    let headers = vec![
        ("host".to_string(), host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    let signed_header_names: Vec<&str> = if include_content_hash_header {
        vec!["host", "x-amz-content-sha256", "x-amz-date"]
    } else {
        vec!["host", "x-amz-date"]
    };

    let mut canonical_headers = String::new();
    for name in &signed_header_names {
        let value = headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value);
        canonical_headers.push('\n');
    }

    let canonical_query = canonical_query_string(raw_query);
    let canonical_request = format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed}\n{payload_hash}",
        signed = signed_header_names.join(";"),
    );

    let scope = format!("{scope_date}/{REGION}/s3/aws4_request");
    let hashed_request = sha256_hex(canonical_request.as_bytes());
    let string_to_sign = format!("AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{hashed_request}");

    let signing_key = derive_signing_key(SECRET_KEY, &scope_date, REGION, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope_date}/{REGION}/s3/aws4_request, SignedHeaders={}, Signature={signature}",
        signed_header_names.join(";"),
    );

    (host, amz_date, authorization)
}
