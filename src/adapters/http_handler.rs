use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    extract::{ConnectInfo, Request as AxumRequest},
    http::{HeaderValue, Method, StatusCode, header},
    routing::any,
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::config_watcher::reload_once,
    config::error::ConfigError,
    core::{
        DenyReason, GatewayError, GatewayRequest, GatewayResponse, GatewayService,
        request::TRACE_ID_HEADER,
    },
    ports::config_source::ConfigSource,
    utils::{real_client_ip, resolve_trace_id},
};

/// Largest request body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Reserved path prefix for the gateway's own endpoints.
pub const ADMIN_PREFIX: &str = "/_gateway";

/// HTTP handler bridging axum and the gateway pipeline.
#[derive(Clone)]
pub struct HttpHandler {
    gateway_service: Arc<GatewayService>,
    config_source: Option<Arc<dyn ConfigSource>>,
}

impl HttpHandler {
    pub fn new(
        gateway_service: Arc<GatewayService>,
        config_source: Option<Arc<dyn ConfigSource>>,
    ) -> Self {
        Self {
            gateway_service,
            config_source,
        }
    }

    /// Main request handler: admin endpoints first, everything else through
    /// the pipeline.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let path = req.uri().path().to_string();
        let trace_id = resolve_trace_id(req.headers());

        if let Some(admin_path) = path.strip_prefix(ADMIN_PREFIX) {
            if admin_path.is_empty() || admin_path.starts_with('/') {
                let client_ip = real_client_ip(req.headers(), client_addr);
                tracing::debug!(method = %req.method(), %path, %client_ip, "Admin request");
                let mut response = self.handle_admin(req.method(), admin_path, &client_ip).await;
                response.set_header(TRACE_ID_HEADER, &trace_id);
                return into_axum_response(response);
            }
        }

        let gateway_req = match to_gateway_request(req, client_addr, &trace_id).await {
            Ok(gateway_req) => gateway_req,
            Err(mut response) => {
                response.set_header(TRACE_ID_HEADER, &trace_id);
                return into_axum_response(response);
            }
        };
        let response = self.gateway_service.handle(gateway_req).await;
        into_axum_response(response)
    }

    async fn handle_admin(&self, method: &Method, path: &str, client_ip: &str) -> GatewayResponse {
        // Same whitelist as the proxied traffic, read from the live snapshot.
        let snapshot = self.gateway_service.store().current();
        if !snapshot.policies.whitelist.admits(client_ip) {
            tracing::warn!(%client_ip, %path, "Admin request rejected by IP whitelist");
            return GatewayResponse::denied(DenyReason::Ip {
                ip: client_ip.to_string(),
            });
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health(),
            (&Method::GET, ["config", "status"]) => self.handle_status().await,
            (&Method::POST, ["config", "refresh"]) => self.handle_refresh().await,
            (&Method::POST, ["circuit-breakers", route_id, "reset"]) => {
                self.handle_breaker_reset(route_id).await
            }
            (_, ["health"] | ["config", "status"] | ["config", "refresh"])
            | (_, ["circuit-breakers", _, "reset"]) => {
                GatewayResponse::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => GatewayResponse::not_found(format!("Unknown admin endpoint: {ADMIN_PREFIX}{path}")),
        }
    }

    fn handle_health(&self) -> GatewayResponse {
        let snapshot = self.gateway_service.store().current();
        GatewayResponse::json(
            StatusCode::OK,
            &serde_json::json!({
                "status": "ok",
                "generation": snapshot.generation(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )
    }

    async fn handle_status(&self) -> GatewayResponse {
        let snapshot = self.gateway_service.store().current();
        let routes: Vec<serde_json::Value> = snapshot
            .routes()
            .iter()
            .map(|route| {
                serde_json::json!({
                    "id": route.id,
                    "pathPattern": route.pattern.as_str(),
                    "targets": route.targets,
                    "stripPrefix": route.strip_prefix,
                    "requireAuth": route.require_auth,
                })
            })
            .collect();
        let breakers = self.gateway_service.circuit_breakers().states().await;

        GatewayResponse::json(
            StatusCode::OK,
            &serde_json::json!({
                "generation": snapshot.generation(),
                "routes": routes,
                "circuitBreakers": breakers,
                "source": self.config_source.as_ref().map(|s| s.describe()),
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )
    }

    async fn handle_refresh(&self) -> GatewayResponse {
        let Some(source) = &self.config_source else {
            return GatewayResponse::error(
                StatusCode::SERVICE_UNAVAILABLE,
                "No configuration source attached",
            );
        };

        match reload_once(source.as_ref(), self.gateway_service.store()).await {
            Ok(snapshot) => {
                tracing::info!(generation = snapshot.generation(), "Manual configuration refresh");
                GatewayResponse::json(
                    StatusCode::OK,
                    &serde_json::json!({
                        "status": "ok",
                        "generation": snapshot.generation(),
                    }),
                )
            }
            Err(e) => {
                tracing::error!("Manual configuration refresh failed: {e:#}");
                let error = match e.downcast::<ConfigError>() {
                    Ok(config) => GatewayError::Config(config),
                    Err(other) => {
                        GatewayError::Internal(format!("Configuration refresh failed: {other:#}"))
                    }
                };
                error.into_response()
            }
        }
    }

    async fn handle_breaker_reset(&self, route_id: &str) -> GatewayResponse {
        if self.gateway_service.circuit_breakers().reset(route_id).await {
            GatewayResponse::json(
                StatusCode::OK,
                &serde_json::json!({ "routeId": route_id, "state": "CLOSED" }),
            )
        } else {
            GatewayResponse::not_found(format!("No circuit breaker for route: {route_id}"))
        }
    }
}

/// Catch-all axum router sending every path to `handler`.
///
/// Needs `ConnectInfo<SocketAddr>`, so serve it with
/// `into_make_service_with_connect_info`.
pub fn router(handler: Arc<HttpHandler>) -> axum::Router {
    let route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, mut req: AxumRequest| {
                let handler = handler.clone();
                async move {
                    // Pin the trace id so a failure below still reports it.
                    let trace_id = resolve_trace_id(req.headers());
                    if let Ok(value) = HeaderValue::from_str(&trace_id) {
                        req.headers_mut().insert(TRACE_ID_HEADER, value);
                    }
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => Ok::<Response<AxumBody>, Infallible>(response),
                        Err(e) => {
                            tracing::error!(%trace_id, "Request handling error: {:?}", e);
                            Ok(fallback_response(&trace_id))
                        }
                    }
                }
            },
        )
    };

    axum::Router::new()
        .route("/{*path}", route(handler.clone()))
        .route("/", route(handler))
        .layer(TraceLayer::new_for_http())
}

/// Last-resort 500 built without the fallible response builder.
fn fallback_response(trace_id: &str) -> Response<AxumBody> {
    let body = serde_json::json!({
        "error": "Internal server error",
        "status": 500,
        "traceId": trace_id,
    });
    let mut response = Response::new(AxumBody::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Buffer an axum request into the pipeline's request type.
async fn to_gateway_request(
    req: Request<AxumBody>,
    client_addr: Option<SocketAddr>,
    trace_id: &str,
) -> Result<GatewayRequest, GatewayResponse> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            tracing::warn!(%trace_id, path = %parts.uri.path(), "Rejected request body: {e}");
            GatewayResponse::error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
        })?;

    let client_ip = real_client_ip(&parts.headers, client_addr);

    Ok(GatewayRequest::new(parts.method, parts.uri.path())
        .with_query(parts.uri.query())
        .with_headers(parts.headers)
        .with_body(body)
        .with_client_ip(client_ip)
        .with_trace_id(trace_id))
}

fn into_axum_response(response: GatewayResponse) -> Result<Response<AxumBody>> {
    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers;
        // The body is re-framed from the buffered bytes.
        headers.remove(header::CONTENT_LENGTH);
    }
    builder
        .body(AxumBody::from(response.body))
        .wrap_err("Failed to build response")
}
