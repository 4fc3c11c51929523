use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    ports::http_client::{
        HttpClient, HttpClientError, HttpClientResult, OutboundRequest, OutboundResponse,
    },
    tracing_setup::create_backend_span,
};

const USER_AGENT: &str = concat!("hotgate/", env!("CARGO_PKG_VERSION"));

/// HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Requests and responses are fully buffered. The whole exchange, body
/// included, runs under the request's timeout.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        tracing::info!("Loaded {} native root certificates.", root_cert_store.len());

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https_connector);

        tracing::info!("Created outbound HTTP client");
        Ok(Self { client })
    }

    fn build_request(req: OutboundRequest) -> HttpClientResult<Request<Full<Bytes>>> {
        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|e| HttpClientError::InvalidRequest(format!("{}: {e}", req.url)))?;
        let host = uri
            .host()
            .ok_or_else(|| HttpClientError::InvalidRequest(format!("{} has no host", req.url)))?;
        let host_header = match uri.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host_header = HeaderValue::from_str(&host_header)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let mut request = Request::builder()
            .method(req.method)
            .uri(uri)
            .version(Version::HTTP_11)
            .body(Full::new(req.body))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        *headers = req.headers;
        headers.insert(header::HOST, host_header);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
        Ok(request)
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send(&self, req: OutboundRequest) -> HttpClientResult<OutboundResponse> {
        let limit = req.timeout;
        let url = req.url.clone();
        let method = req.method.clone();
        let request = Self::build_request(req)?;

        let backend = format!(
            "{}://{}",
            request.uri().scheme_str().unwrap_or("http"),
            request
                .uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = create_backend_span(&backend, method.as_str(), request.uri().path());
        let started = Instant::now();

        let exchange = async {
            let response = self.client.request(request).await.map_err(|e| {
                HttpClientError::ConnectionError(format!("Request to {method} {url} failed: {e}"))
            })?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| {
                    HttpClientError::ConnectionError(format!(
                        "Reading response from {method} {url} failed: {e}"
                    ))
                })?
                .to_bytes();
            Ok::<_, HttpClientError>(OutboundResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        let result = match timeout(limit, exchange).instrument(span.clone()).await {
            Ok(result) => result,
            Err(_) => Err(HttpClientError::Timeout(limit.as_millis() as u64)),
        };

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        match &result {
            Ok(response) => {
                span.record("http.status_code", response.status.as_u16());
                tracing::debug!(parent: &span, status = response.status.as_u16(), "Backend responded");
            }
            Err(e) => {
                span.record("http.status_code", 599u16);
                tracing::warn!(parent: &span, "Backend request failed: {e}");
            }
        }
        result
    }
}
