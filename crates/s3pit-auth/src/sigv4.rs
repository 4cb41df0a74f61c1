//! AWS Signature Version 4 request verification.
//!
//! Supports both the header form (`Authorization: AWS4-HMAC-SHA256
//! Credential=.../SignedHeaders=.../Signature=...`) and the presigned
//! query-string form (`X-Amz-Algorithm`, `X-Amz-Credential`,
//! `X-Amz-Date`, `X-Amz-Expires`, `X-Amz-SignedHeaders`,
//! `X-Amz-Signature`).

use crate::registry::{TenantRecord, TenantRegistry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use s3pit_common::error::Error;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// How far a signed request's timestamp may drift from "now" before it is
/// rejected as a replay (header form only; presigned URLs instead carry an
/// explicit `X-Amz-Expires` window).
const REPLAY_WINDOW_MINUTES: i64 = 15;

/// Everything the dispatcher needs to verify one inbound request.
pub struct RequestToVerify<'a> {
    pub method: &'a str,
    /// Path only, already percent-decoded down to raw bytes is NOT assumed;
    /// canonicalisation re-encodes per AWS rules from this raw path.
    pub path: &'a str,
    /// Query parameters as received, still percent-encoded.
    pub query: &'a [(String, String)],
    /// Header name (lowercased) to raw value.
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
}

/// The caller identity recovered from a verified request.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub access_key_id: String,
}

/// Verifies SigV4 signatures against a [`TenantRegistry`].
pub struct SigV4Verifier {
    region: String,
    service: String,
}

impl SigV4Verifier {
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: "s3".to_string(),
        }
    }

    /// Verify a request signed via the `Authorization` header.
    pub fn verify_header(
        &self,
        registry: &TenantRegistry,
        req: &RequestToVerify<'_>,
    ) -> Result<VerifiedIdentity, Error> {
        let auth_header = find_header(req.headers, "authorization").ok_or(Error::MissingAuth)?;
        let parsed = parse_authorization_header(auth_header)?;

        let date_header = find_header(req.headers, "x-amz-date")
            .or_else(|| find_header(req.headers, "date"))
            .ok_or(Error::IncompleteAuth("missing date header".to_string()))?;
        let request_time = parse_amz_date(date_header)?;

        let now = Utc::now();
        if (now - request_time).num_minutes().abs() > REPLAY_WINDOW_MINUTES {
            return Err(Error::PresignedUrlExpired);
        }

        let tenant = registry
            .lookup(&parsed.access_key_id)
            .ok_or_else(|| Error::AccessKeyNotFound(parsed.access_key_id.clone()))?;

        let canonical_query = build_canonical_query_string(req.query, None);
        let canonical_request = build_canonical_request(
            req.method,
            req.path,
            &canonical_query,
            req.headers,
            &parsed.signed_headers,
            req.payload_hash,
        );

        let string_to_sign = build_string_to_sign(
            &request_time,
            &parsed.scope_date,
            &self.region,
            &self.service,
            &canonical_request,
        );

        let signing_key = derive_signing_key(
            &tenant.secret_access_key,
            &parsed.scope_date,
            &self.region,
            &self.service,
        );
        let expected = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        if !constant_time_eq(expected.as_bytes(), parsed.signature.as_bytes()) {
            return Err(Error::SignatureMismatch);
        }

        Ok(VerifiedIdentity {
            access_key_id: parsed.access_key_id,
        })
    }

    /// Verify a presigned (query-string) request.
    pub fn verify_presigned(
        &self,
        registry: &TenantRegistry,
        req: &RequestToVerify<'_>,
    ) -> Result<VerifiedIdentity, Error> {
        let q = |name: &str| find_query(req.query, name);

        let algorithm = q("X-Amz-Algorithm").ok_or(Error::MissingAuth)?;
        if algorithm != "AWS4-HMAC-SHA256" {
            return Err(Error::InvalidAlgorithm);
        }
        let credential = q("X-Amz-Credential")
            .ok_or_else(|| Error::IncompleteAuth("missing X-Amz-Credential".to_string()))?;
        let signed_headers_raw = q("X-Amz-SignedHeaders")
            .ok_or_else(|| Error::IncompleteAuth("missing X-Amz-SignedHeaders".to_string()))?;
        let date_raw = q("X-Amz-Date")
            .ok_or_else(|| Error::IncompleteAuth("missing X-Amz-Date".to_string()))?;
        let expires_raw = q("X-Amz-Expires")
            .ok_or_else(|| Error::IncompleteAuth("missing X-Amz-Expires".to_string()))?;
        let signature = q("X-Amz-Signature")
            .ok_or_else(|| Error::IncompleteAuth("missing X-Amz-Signature".to_string()))?;

        let (access_key_id, scope_date) = parse_credential_scope(&credential)?;
        let signed_headers: Vec<String> = signed_headers_raw
            .split(';')
            .map(str::to_lowercase)
            .collect();

        let request_time = parse_amz_date(&date_raw)?;
        let expires_secs: i64 = expires_raw
            .parse()
            .map_err(|_| Error::IncompleteAuth("X-Amz-Expires not numeric".to_string()))?;
        let expires_at = request_time + ChronoDuration::seconds(expires_secs);
        if Utc::now() > expires_at {
            return Err(Error::PresignedUrlExpired);
        }

        let tenant: TenantRecord = registry
            .lookup(&access_key_id)
            .ok_or_else(|| Error::AccessKeyNotFound(access_key_id.clone()))?;

        let query_without_signature: Vec<(String, String)> = req
            .query
            .iter()
            .filter(|(k, _)| k != "X-Amz-Signature")
            .cloned()
            .collect();
        let canonical_query = build_canonical_query_string(&query_without_signature, None);

        let canonical_request = build_canonical_request(
            req.method,
            req.path,
            &canonical_query,
            req.headers,
            &signed_headers,
            "UNSIGNED-PAYLOAD",
        );

        let string_to_sign = build_string_to_sign(
            &request_time,
            &scope_date,
            &self.region,
            &self.service,
            &canonical_request,
        );

        let signing_key =
            derive_signing_key(&tenant.secret_access_key, &scope_date, &self.region, &self.service);
        let expected = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(Error::SignatureMismatch);
        }

        Ok(VerifiedIdentity { access_key_id })
    }
}

struct ParsedAuthorization {
    access_key_id: String,
    scope_date: String,
    signed_headers: Vec<String>,
    signature: String,
}

fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, Error> {
    let rest = header
        .strip_prefix("AWS4-HMAC-SHA256 ")
        .ok_or(Error::UnsupportedVersion)?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("Credential=") {
            credential = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("Signature=") {
            signature = Some(v.to_string());
        }
    }

    let credential =
        credential.ok_or_else(|| Error::IncompleteAuth("missing Credential".to_string()))?;
    let signed_headers =
        signed_headers.ok_or_else(|| Error::IncompleteAuth("missing SignedHeaders".to_string()))?;
    let signature =
        signature.ok_or_else(|| Error::IncompleteAuth("missing Signature".to_string()))?;

    let (access_key_id, scope_date) = parse_credential_scope(&credential)?;

    Ok(ParsedAuthorization {
        access_key_id,
        scope_date,
        signed_headers: signed_headers.split(';').map(str::to_lowercase).collect(),
        signature,
    })
}

/// Split a `Credential=AKID/20230101/region/s3/aws4_request` value (the
/// value only, caller strips the `Credential=` prefix if present) into
/// access key id and scope date.
fn parse_credential_scope(credential: &str) -> Result<(String, String), Error> {
    let mut parts = credential.splitn(2, '/');
    let access_key_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidCredential(credential.to_string()))?
        .to_string();
    let remainder = parts
        .next()
        .ok_or_else(|| Error::InvalidCredential(credential.to_string()))?;
    let scope_date = remainder
        .split('/')
        .next()
        .filter(|s| s.len() == 8)
        .ok_or_else(|| Error::InvalidCredential(credential.to_string()))?
        .to_string();
    Ok((access_key_id, scope_date))
}

fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, Error> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| Error::IncompleteAuth(format!("invalid date {value:?}")))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_query(query: &[(String, String)], name: &str) -> Option<String> {
    query
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

fn build_canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    headers: &[(String, String)],
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let canonical_uri = if path.is_empty() { "/" } else { path };

    let mut canonical_headers = String::new();
    for name in signed_headers {
        let value = find_header(headers, name).unwrap_or("");
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value.trim());
        canonical_headers.push('\n');
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed}\n{payload_hash}",
        signed = signed_headers.join(";"),
    )
}

/// Percent-decode then percent-re-encode every value and sort by key, per
/// AWS canonical query string rules. A `skip` key (e.g. the presigned
/// signature itself) is always excluded by the caller beforehand.
fn build_canonical_query_string(query: &[(String, String)], _skip: Option<&str>) -> String {
    let mut pairs: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in query {
        let decoded_key = url_decode(k);
        let decoded_value = url_decode(v);
        pairs.insert(url_encode(&decoded_key, true), url_encode(&decoded_value, true));
    }
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_string_to_sign(
    request_time: &DateTime<Utc>,
    scope_date: &str,
    region: &str,
    service: &str,
    canonical_request: &str,
) -> String {
    let amz_date = request_time.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{scope_date}/{region}/{service}/aws4_request");
    let hashed_request = hex_sha256(canonical_request.as_bytes());
    format!("AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{hashed_request}")
}

fn derive_signing_key(secret: &str, scope_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a request body, hex-encoded, for callers that need to fill in
/// `x-amz-content-sha256` themselves when a client omitted the header.
#[must_use]
pub fn payload_sha256(data: &[u8]) -> String {
    hex_sha256(data)
}

/// Percent-encode per AWS's rules: unreserved characters pass through,
/// everything else becomes uppercase `%XX`. When `encode_slash` is true
/// (query strings) `/` is escaped too; canonical URI building keeps `/`
/// as a path separator instead.
fn url_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
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

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3pit_common::config::{TenantConfig, TenantConfigDocument};

    fn registry_with(access_key: &str, secret: &str) -> TenantRegistry {
        TenantRegistry::load(&TenantConfigDocument {
            global_dir: Some("/tmp/s3pit-test".to_string()),
            tenants: vec![TenantConfig {
                access_key_id: access_key.to_string(),
                secret_access_key: secret.to_string(),
                custom_dir: None,
                description: None,
                public_buckets: vec![],
            }],
        })
        .unwrap()
    }

    #[test]
    fn url_encode_keeps_unreserved_escapes_rest() {
        assert_eq!(url_encode("abc-._~", true), "abc-._~");
        assert_eq!(url_encode("a b", true), "a%20b");
        assert_eq!(url_encode("/a/b", true), "%2Fa%2Fb");
        assert_eq!(url_encode("/a/b", false), "/a/b");
    }

    #[test]
    fn hex_sha256_matches_known_vector() {
        // sha256("") == e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn constant_time_eq_detects_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn parse_credential_scope_splits_correctly() {
        let (key, date) = parse_credential_scope("AKID/20230615/us-east-1/s3/aws4_request").unwrap();
        assert_eq!(key, "AKID");
        assert_eq!(date, "20230615");
    }

    #[test]
    fn verify_header_accepts_correctly_signed_request() {
        let registry = registry_with("AKID", "secretkey");
        let verifier = SigV4Verifier::new("us-east-1");

        let scope_date = "20230615";
        let amz_date = "20230615T120000Z";
        let headers = vec![
            ("host".to_string(), "localhost:9000".to_string()),
            ("x-amz-date".to_string(), amz_date.to_string()),
            ("x-amz-content-sha256".to_string(), hex_sha256(b"")),
        ];
        let signed_headers = vec!["host".to_string(), "x-amz-date".to_string()];
        let payload_hash = hex_sha256(b"");

        let canonical_request = build_canonical_request(
            "GET",
            "/bucket/key",
            "",
            &headers,
            &signed_headers,
            &payload_hash,
        );
        let request_time = parse_amz_date(amz_date).unwrap();
        let string_to_sign =
            build_string_to_sign(&request_time, scope_date, "us-east-1", "s3", &canonical_request);
        let signing_key = derive_signing_key("secretkey", scope_date, "us-east-1", "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let auth_header = format!(
            "AWS4-HMAC-SHA256 Credential=AKID/{scope_date}/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature={signature}"
        );
        let mut all_headers = headers.clone();
        all_headers.push(("authorization".to_string(), auth_header));

        let req = RequestToVerify {
            method: "GET",
            path: "/bucket/key",
            query: &[],
            headers: &all_headers,
            payload_hash: &payload_hash,
        };

        let identity = verifier.verify_header(&registry, &req).unwrap();
        assert_eq!(identity.access_key_id, "AKID");
    }

    #[test]
    fn verify_header_rejects_tampered_signature() {
        let registry = registry_with("AKID", "secretkey");
        let verifier = SigV4Verifier::new("us-east-1");

        let headers = vec![
            ("host".to_string(), "localhost:9000".to_string()),
            ("x-amz-date".to_string(), "20230615T120000Z".to_string()),
            (
                "authorization".to_string(),
                "AWS4-HMAC-SHA256 Credential=AKID/20230615/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=deadbeef".to_string(),
            ),
        ];

        let req = RequestToVerify {
            method: "GET",
            path: "/bucket/key",
            query: &[],
            headers: &headers,
            payload_hash: &hex_sha256(b""),
        };

        let err = verifier.verify_header(&registry, &req).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch));
    }

    #[test]
    fn verify_header_rejects_unknown_access_key() {
        let registry = registry_with("AKID", "secretkey");
        let verifier = SigV4Verifier::new("us-east-1");

        let headers = vec![
            ("host".to_string(), "localhost:9000".to_string()),
            ("x-amz-date".to_string(), "20230615T120000Z".to_string()),
            (
                "authorization".to_string(),
                "AWS4-HMAC-SHA256 Credential=NOTREAL/20230615/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=deadbeef".to_string(),
            ),
        ];

        let req = RequestToVerify {
            method: "GET",
            path: "/bucket/key",
            query: &[],
            headers: &headers,
            payload_hash: &hex_sha256(b""),
        };

        let err = verifier.verify_header(&registry, &req).unwrap_err();
        assert!(matches!(err, Error::AccessKeyNotFound(_)));
    }

    #[test]
    fn verify_presigned_rejects_expired_url() {
        let registry = registry_with("AKID", "secretkey");
        let verifier = SigV4Verifier::new("us-east-1");

        let query = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                "AKID/20200101/us-east-1/s3/aws4_request".to_string(),
            ),
            ("X-Amz-Date".to_string(), "20200101T000000Z".to_string()),
            ("X-Amz-Expires".to_string(), "60".to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
            ("X-Amz-Signature".to_string(), "whatever".to_string()),
        ];
        let headers = vec![("host".to_string(), "localhost:9000".to_string())];

        let req = RequestToVerify {
            method: "GET",
            path: "/bucket/key",
            query: &query,
            headers: &headers,
            payload_hash: "UNSIGNED-PAYLOAD",
        };

        let err = verifier.verify_presigned(&registry, &req).unwrap_err();
        assert!(matches!(err, Error::PresignedUrlExpired));
    }
}
