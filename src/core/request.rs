use std::{sync::OnceLock, time::Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};

use crate::core::error::DenyReason;

pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

/// An inbound request as seen by the filter chain.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
    pub trace_id: String,
    pub received_at: Instant,
    matched_route_id: OnceLock<String>,
    target_url: OnceLock<String>,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: "unknown".to_string(),
            trace_id: String::new(),
            received_at: Instant::now(),
            matched_route_id: OnceLock::new(),
            target_url: OnceLock::new(),
        }
    }

    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.filter(|q| !q.is_empty()).map(str::to_string);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// First non-empty value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn matched_route_id(&self) -> Option<&str> {
        self.matched_route_id.get().map(String::as_str)
    }

    /// Record the matched route; later calls are ignored.
    pub fn set_matched_route_id(&self, id: &str) -> bool {
        self.matched_route_id.set(id.to_string()).is_ok()
    }

    pub fn target_url(&self) -> Option<&str> {
        self.target_url.get().map(String::as_str)
    }

    /// Record the outbound URL; later calls are ignored.
    pub fn set_target_url(&self, url: &str) -> bool {
        self.target_url.set(url.to_string()).is_ok()
    }
}

/// The gateway's answer, either relayed from a backend or produced locally.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub error: Option<String>,
    /// Set when a policy filter produced this response.
    pub denied_by: Option<DenyReason>,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            error: None,
            denied_by: None,
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    /// A locally generated JSON error body: `{"error":..,"status":..}`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });
        Self::json(status, &body).with_error(message)
    }

    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, body.to_string())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::error(StatusCode::FORBIDDEN, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::error(StatusCode::UNAUTHORIZED, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::error(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::error(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(StatusCode::NOT_FOUND, message)
    }

    /// A policy denial. Carries the reason so wrapping filters can tell it
    /// apart from a downstream failure.
    pub fn denied(reason: DenyReason) -> Self {
        let mut response = Self::error(reason.status(), reason.to_string());
        response.denied_by = Some(reason);
        response
    }

    fn with_error(mut self, message: String) -> Self {
        self.error = Some(message);
        self
    }

    pub fn is_denial(&self) -> bool {
        self.denied_by.is_some()
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }
}
