#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use hotgate::{
    ConfigStore, GatewayService,
    config::RawDocument,
    core::{GatewayRequest, GatewayResponse},
    ports::http_client::{
        HttpClient, HttpClientError, HttpClientResult, OutboundRequest, OutboundResponse,
    },
};
use http::{HeaderMap, Method, StatusCode};

type Responder = dyn Fn(&OutboundRequest) -> HttpClientResult<OutboundResponse> + Send + Sync;

/// Scripted `HttpClient` that records every outbound request.
pub struct MockHttpClient {
    responder: Box<Responder>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl MockHttpClient {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&OutboundRequest) -> HttpClientResult<OutboundResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers 200 to everything: `/verify` calls and backend calls alike.
    pub fn ok() -> Arc<Self> {
        Self::new(|_| Ok(response(StatusCode::OK, "ok")))
    }

    pub fn with_status(status: StatusCode) -> Arc<Self> {
        Self::new(move |req| {
            if req.url.ends_with("/verify") {
                Ok(response(StatusCode::OK, ""))
            } else {
                Ok(response(status, "backend"))
            }
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn backend_requests(&self) -> Vec<OutboundRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.url.ends_with("/verify"))
            .collect()
    }

    pub fn last_request(&self) -> Option<OutboundRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, req: OutboundRequest) -> HttpClientResult<OutboundResponse> {
        self.requests.lock().unwrap().push(req.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&req)
    }
}

pub fn response(status: StatusCode, body: &'static str) -> OutboundResponse {
    OutboundResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from_static(body.as_bytes()),
    }
}

pub fn connection_refused() -> HttpClientResult<OutboundResponse> {
    Err(HttpClientError::ConnectionError("connection refused".to_string()))
}

pub fn gateway(doc: &str, client: Arc<MockHttpClient>) -> (Arc<ConfigStore>, GatewayService) {
    let store = Arc::new(ConfigStore::new());
    store
        .apply_document(&RawDocument::yaml(doc))
        .expect("valid test document");
    let service = GatewayService::new(store.clone(), client);
    (store, service)
}

pub fn get(path: &str) -> GatewayRequest {
    GatewayRequest::new(Method::GET, path)
        .with_client_ip("10.0.0.1")
        .with_trace_id("0123456789abcdef0123456789abcdef")
}

pub fn body_json(response: &GatewayResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).expect("json body")
}
