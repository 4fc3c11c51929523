pub mod config_source;
pub mod http_client;

pub use config_source::ConfigSource;
pub use http_client::{
    HttpClient, HttpClientError, HttpClientResult, OutboundRequest, OutboundResponse,
};
