pub mod file;
pub mod http;

use std::{sync::Arc, time::Duration};

use eyre::Result;

pub use file::FileConfigSource;
pub use http::HttpConfigSource;

use crate::{config::settings::GatewaySettings, ports::config_source::ConfigSource};

/// Pick the source implementation for a location: `http(s)://` URLs are
/// polled, anything else is a watched file.
pub fn source_for(location: &str, poll_interval: Duration) -> Result<Arc<dyn ConfigSource>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpConfigSource::new(location, poll_interval)?))
    } else {
        Ok(Arc::new(FileConfigSource::new(location)?))
    }
}

pub fn source_from_settings(settings: &GatewaySettings) -> Result<Arc<dyn ConfigSource>> {
    source_for(
        &settings.config_source,
        Duration::from_secs(settings.poll_interval_secs.max(1)),
    )
}
