//! Presigned URL generation.
//!
//! Not exercised by the server itself (which only *verifies* presigned
//! URLs), but kept alongside the verifier so integration tests and any
//! future client tooling can mint URLs the verifier is known to accept.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Build a presigned GET URL for `bucket`/`key`, valid for `expires_in`.
#[must_use]
pub fn presign_get(
    endpoint: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
    bucket: &str,
    key: &str,
    signed_at: DateTime<Utc>,
    expires_in: Duration,
) -> String {
    let amz_date = signed_at.format("%Y%m%dT%H%M%SZ").to_string();
    let scope_date = signed_at.format("%Y%m%d").to_string();
    let scope = format!("{scope_date}/{region}/s3/aws4_request");
    let credential = format!("{access_key_id}/{scope}");

    let host = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string());
    params.insert("X-Amz-Credential".to_string(), uri_encode(&credential, true));
    params.insert("X-Amz-Date".to_string(), amz_date.clone());
    params.insert("X-Amz-Expires".to_string(), expires_in.as_secs().to_string());
    params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());

    let canonical_query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_uri = format!(
        "/{}/{}",
        uri_encode(bucket, false),
        key.split('/').map(|seg| uri_encode(seg, false)).collect::<Vec<_>>().join("/")
    );

    let canonical_headers = format!("host:{host}\n");
    let canonical_request = format!(
        "GET\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\nhost\nUNSIGNED-PAYLOAD"
    );

    let hashed_request = hex_sha256(canonical_request.as_bytes());
    let string_to_sign = format!("AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{hashed_request}");

    let signing_key = derive_signing_key(secret_access_key, &scope_date, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{endpoint}{canonical_uri}?{canonical_query}&X-Amz-Signature={signature}",
    )
}

fn derive_signing_key(secret: &str, scope_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn uri_encode(input: &str, encode_slash: bool) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn presign_produces_valid_url_shape() {
        let signed_at = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap();
        let url = presign_get(
            "http://localhost:9000",
            "us-east-1",
            "AKID",
            "secretkey",
            "my-bucket",
            "path/to/object.txt",
            signed_at,
            Duration::from_secs(900),
        );

        assert!(url.starts_with("http://localhost:9000/my-bucket/path/to/object.txt?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=900"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
