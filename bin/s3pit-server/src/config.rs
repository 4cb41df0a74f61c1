//! Loads the tenant configuration document from disk, sniffing JSON vs.
//! TOML by file extension and falling back to trying both when the
//! extension doesn't tell us.

use s3pit_common::config::TenantConfigDocument;
use s3pit_common::error::ConfigError;
use std::path::Path;

pub fn load(path: &Path) -> Result<TenantConfigDocument, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents),
        Some("toml") => parse_toml(&contents),
        _ => parse_json(&contents).or_else(|_| parse_toml(&contents)),
    }
}

fn parse_json(contents: &str) -> Result<TenantConfigDocument, ConfigError> {
    serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn parse_toml(contents: &str) -> Result<TenantConfigDocument, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_document() {
        let doc = parse_json(
            r#"{"globalDir": "/data", "tenants": [{"accessKeyId": "AKID", "secretAccessKey": "s"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.global_dir.as_deref(), Some("/data"));
        assert_eq!(doc.tenants.len(), 1);
    }

    #[test]
    fn parses_toml_document() {
        let doc = parse_toml(
            "globalDir = \"/data\"\n\n[[tenants]]\naccessKeyId = \"AKID\"\nsecretAccessKey = \"s\"\n",
        )
        .unwrap();
        assert_eq!(doc.global_dir.as_deref(), Some("/data"));
        assert_eq!(doc.tenants.len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_json("not json").is_err());
        assert!(parse_toml("not = = toml").is_err());
    }
}
