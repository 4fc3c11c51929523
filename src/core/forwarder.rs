//! The terminal endpoint of the filter chain: relays a request to a target.
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::{
    core::{
        error::GatewayError,
        filter::{Endpoint, FilterContext},
        request::{GatewayRequest, GatewayResponse, TRACE_ID_HEADER},
        router::Router,
        snapshot::{HeaderTransform, RouteDefinition},
    },
    ports::http_client::{HttpClient, HttpClientError, OutboundRequest},
};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Headers sent to the backend: the inbound set minus hop-by-hop entries,
/// plus tracing and forwarding headers, with route transforms applied last.
pub fn outbound_headers(req: &GatewayRequest, route: &RouteDefinition) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(req.headers.len() + 3);
    for (name, value) in &req.headers {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Ok(value) = HeaderValue::from_str(&req.trace_id) {
        headers.insert(TRACE_ID_HEADER, value);
    }

    let forwarded_for = match req.header(X_FORWARDED_FOR.as_str()) {
        Some(existing) => format!("{existing}, {}", req.client_ip),
        None => req.client_ip.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&req.client_ip) {
        headers.insert(X_REAL_IP, value);
    }

    for transform in &route.header_transforms {
        match transform {
            HeaderTransform::Set(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
            HeaderTransform::Remove(name) => {
                headers.remove(name);
            }
        }
    }
    headers
}

pub struct Forwarder {
    client: Arc<dyn HttpClient>,
}

impl Forwarder {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    async fn forward(
        &self,
        ctx: &FilterContext,
        req: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let route = ctx
            .route(&req)
            .ok_or_else(|| GatewayError::RouteNotFound {
                path: req.path.clone(),
            })?
            .clone();
        req.set_matched_route_id(&route.id);

        let url = Router::build_target_url(&req, &route)?;
        req.set_target_url(&url);

        let mut outbound = OutboundRequest::new(
            req.method.clone(),
            url.as_str(),
            ctx.snapshot().policies.forward_timeout,
        );
        outbound.headers = outbound_headers(&req, &route);
        outbound.body = req.body.clone();

        tracing::debug!(
            route_id = %route.id,
            trace_id = %req.trace_id,
            target = %url,
            "Forwarding request"
        );

        let response = self.client.send(outbound).await.map_err(|e| match e {
            HttpClientError::InvalidRequest(message) => GatewayError::InvalidTarget(message),
            other => GatewayError::Forward(other.to_string()),
        })?;

        let mut headers = response.headers;
        for name in &HOP_BY_HOP {
            if *name != header::HOST {
                headers.remove(name);
            }
        }
        Ok(GatewayResponse::new(response.status, headers, response.body))
    }
}

#[async_trait]
impl Endpoint for Forwarder {
    async fn call(&self, ctx: &FilterContext, req: GatewayRequest) -> GatewayResponse {
        let trace_id = req.trace_id.clone();
        match self.forward(ctx, req).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    GatewayError::RouteNotFound { path } => {
                        tracing::debug!(%trace_id, %path, "No route matched");
                    }
                    other => tracing::error!(%trace_id, "Forwarding failed: {other}"),
                }
                e.into_response()
            }
        }
    }
}
