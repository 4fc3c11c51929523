//! Process bootstrap settings.
//!
//! These are read once at startup and are not part of the hot-reloadable
//! document: where to listen, where the gateway document lives, and how to
//! log. Values are layered from an optional settings file and `HOTGATE_*`
//! environment variables, the latter taking precedence.
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    pub listen_addr: String,
    /// A file path or an `http(s)://` URL serving the gateway document.
    pub config_source: String,
    /// Poll interval for remote sources.
    pub poll_interval_secs: u64,
    /// Quiet period applied to bursts of change notifications.
    pub reload_debounce_ms: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            config_source: "gateway.yaml".to_string(),
            poll_interval_secs: 10,
            reload_debounce_ms: 2000,
            log_level: "info".to_string(),
            log_json: true,
        }
    }
}

impl GatewaySettings {
    /// Whether the document is fetched over HTTP rather than read from disk.
    pub fn is_remote_source(&self) -> bool {
        self.config_source.starts_with("http://") || self.config_source.starts_with("https://")
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    }
}

/// Load settings using the config crate.
///
/// With an explicit path the file must exist. Without one, `hotgate.toml`
/// (or `.yaml` / `.json`) in the working directory is used when present.
pub fn load_settings(path: Option<&str>) -> Result<GatewaySettings> {
    let mut builder = Config::builder();

    builder = match path {
        Some(path) => builder.add_source(File::new(path, file_format(Path::new(path)))),
        None => builder.add_source(File::with_name("hotgate").required(false)),
    };

    let settings = builder
        .add_source(
            Environment::with_prefix("HOTGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| match path {
            Some(path) => format!("Failed to build settings from {path}"),
            None => "Failed to build settings".to_string(),
        })?;

    settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway settings")
}
