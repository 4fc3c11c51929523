use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    path::Path,
};

use eyre::{Context, Result};
use serde_json::Value;

use crate::config::{error::ConfigError, models::GatewayDocument};

/// Encoding of a raw configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from a file extension, defaulting to YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }

    /// Pick the format from an HTTP `Content-Type`, defaulting to YAML.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.contains("json") {
            DocumentFormat::Json
        } else {
            DocumentFormat::Yaml
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Yaml => f.write_str("YAML"),
            DocumentFormat::Json => f.write_str("JSON"),
        }
    }
}

/// A configuration document exactly as delivered by a source.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub content: String,
    pub format: DocumentFormat,
    /// Where the document came from, for log messages.
    pub origin: String,
}

impl RawDocument {
    pub fn new(content: impl Into<String>, format: DocumentFormat, origin: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            format,
            origin: origin.into(),
        }
    }

    pub fn yaml(content: impl Into<String>) -> Self {
        Self::new(content, DocumentFormat::Yaml, "inline")
    }

    pub fn json(content: impl Into<String>) -> Self {
        Self::new(content, DocumentFormat::Json, "inline")
    }

    /// Content hash used to recognise duplicate notifications.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.content.hash(&mut hasher);
        hasher.finish()
    }
}

/// Parse a raw document into its typed form.
///
/// The document may be wrapped in a top-level `gateway` key. An empty
/// document is accepted and yields the defaults with no routes.
pub fn parse_document(raw: &RawDocument) -> Result<GatewayDocument, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        format: raw.format,
        message,
    };

    if raw.content.trim().is_empty() {
        return Ok(GatewayDocument::default());
    }

    let value: Value = match raw.format {
        DocumentFormat::Json => {
            serde_json::from_str(&raw.content).map_err(|e| parse_error(e.to_string()))?
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(&raw.content).map_err(|e| parse_error(e.to_string()))?
        }
    };

    let value = match value {
        Value::Null => return Ok(GatewayDocument::default()),
        Value::Object(mut map) if map.contains_key("gateway") => {
            map.remove("gateway").unwrap_or(Value::Null)
        }
        other => other,
    };

    if value.is_null() {
        return Ok(GatewayDocument::default());
    }

    serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))
}

/// Read a document from disk, inferring the format from the extension.
pub async fn read_document(path: impl AsRef<Path>) -> Result<RawDocument> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration document {}", path.display()))?;
    Ok(RawDocument::new(
        content,
        DocumentFormat::from_path(path),
        path.display().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parses_yaml_with_gateway_root() {
        let raw = RawDocument::yaml(
            r#"
gateway:
  security:
    ip-whitelist:
      enabled: true
      list: ["10.0.0.0/8"]
  routes:
    - id: users
      path-pattern: /api/users/**
      targets: ["http://users:8080"]
      strip-prefix: true
"#,
        );
        let doc = parse_document(&raw).expect("valid yaml");
        assert_eq!(doc.routes.len(), 1);
        assert_eq!(doc.routes[0].id, "users");
        assert!(doc.routes[0].strip_prefix);
        assert_eq!(doc.security.ip_whitelist.list, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn parses_json_without_root() {
        let raw = RawDocument::json(
            r#"{"routes":[{"id":"a","pathPattern":"/a","targets":["http://a"]}]}"#,
        );
        let doc = parse_document(&raw).expect("valid json");
        assert_eq!(doc.routes[0].path_pattern, "/a");
    }

    #[test]
    fn empty_document_has_no_routes() {
        let doc = parse_document(&RawDocument::yaml("")).expect("empty is valid");
        assert!(doc.routes.is_empty());

        let doc = parse_document(&RawDocument::yaml("gateway:\n")).expect("empty root is valid");
        assert!(doc.routes.is_empty());
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse_document(&RawDocument::json("{ not json")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Parse {
                format: DocumentFormat::Json,
                ..
            }
        ));

        let err = parse_document(&RawDocument::yaml("routes: 12")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn digest_tracks_content() {
        let a = RawDocument::yaml("routes: []");
        let b = RawDocument::json("routes: []");
        let c = RawDocument::yaml("routes: [] ");
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[tokio::test]
    async fn reads_document_from_disk() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"{{"routes":[]}}"#).unwrap();

        let raw = read_document(file.path()).await.unwrap();
        assert_eq!(raw.format, DocumentFormat::Json);
        assert!(parse_document(&raw).unwrap().routes.is_empty());
    }
}
