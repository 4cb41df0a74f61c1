//! Tenant configuration document shapes
//!
//! The core consumes only this typed value; reading it from a JSON or
//! TOML file on disk is ambient plumbing left to the binary crate.

use serde::{Deserialize, Serialize};

/// Top-level tenant configuration document, shared between the JSON and
/// TOML representations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TenantConfigDocument {
    /// Directory under which per-tenant storage roots are created when a
    /// tenant does not supply its own `customDir`.
    #[serde(rename = "globalDir", default)]
    pub global_dir: Option<String>,

    /// Registered tenants.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

/// One tenant entry in the configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(rename = "accessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "secretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "customDir", default)]
    pub custom_dir: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "publicBuckets", default)]
    pub public_buckets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_json() {
        let json = r#"{
            "globalDir": "/data",
            "tenants": [
                { "accessKeyId": "AKIDEXAMPLE", "secretAccessKey": "secret" }
            ]
        }"#;
        let doc: TenantConfigDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.global_dir.as_deref(), Some("/data"));
        assert_eq!(doc.tenants.len(), 1);
        assert!(doc.tenants[0].public_buckets.is_empty());
    }
}
