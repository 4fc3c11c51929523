use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the exchange did not finish in time
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// A fully buffered outbound request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Upper bound on the whole exchange, headers and body included.
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout,
        }
    }
}

/// A fully buffered response from a backend.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HttpClient defines the port (interface) for calling backends and the
/// auth service.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request and buffer the whole response.
    ///
    /// Any status code is a successful exchange; only transport failures,
    /// timeouts and malformed requests are errors.
    async fn send(&self, req: OutboundRequest) -> HttpClientResult<OutboundResponse>;
}
