pub mod config_sources;
pub mod config_watcher;
pub mod http_client;
pub mod http_handler;

/// Re-export commonly used types from adapters
pub use config_sources::{FileConfigSource, HttpConfigSource, source_for, source_from_settings};
pub use config_watcher::{reload_once, spawn_config_watcher};
pub use http_client::HttpClientAdapter;
pub use http_handler::{HttpHandler, router};
