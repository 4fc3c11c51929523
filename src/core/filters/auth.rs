//! Bearer-token authentication against an external verify endpoint.
//!
//! The filter always runs. Whether a request needs a token depends only on
//! the skip paths and the matched route's `requireAuth`; `security.auth.enabled`
//! does not switch it off, so a single route can demand auth while the
//! global flag is false.
//!
//! Fails closed: a missing endpoint, a non-200 answer or an unreachable
//! service all reject the request.
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode, header};

use crate::{
    core::{
        error::DenyReason,
        filter::{AUTH_PRIORITY, GatewayFilter, Next},
        request::{GatewayRequest, GatewayResponse, TRACE_ID_HEADER},
        snapshot::AuthPolicy,
    },
    ports::http_client::{HttpClient, OutboundRequest},
};

const BEARER_PREFIX: &str = "Bearer ";
const FALLBACK_TOKEN_HEADER: &str = "token";

/// Token from `Authorization: Bearer <t>`, else the `token` header.
pub fn extract_token(req: &GatewayRequest) -> Option<&str> {
    let bearer = req
        .header(header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    bearer.or_else(|| req.header(FALLBACK_TOKEN_HEADER))
}

fn verify_url(base: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{base}/verify")
}

pub struct AuthFilter {
    client: Arc<dyn HttpClient>,
}

impl AuthFilter {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    async fn verify(
        &self,
        policy: &AuthPolicy,
        token: &str,
        trace_id: &str,
    ) -> Result<(), DenyReason> {
        let Some(base) = policy.server_url.as_deref() else {
            tracing::warn!(trace_id, "No authentication server configured, rejecting");
            return Err(DenyReason::InvalidToken);
        };

        let mut request = OutboundRequest::new(Method::GET, verify_url(base), policy.timeout);
        let bearer = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))
            .map_err(|_| DenyReason::InvalidToken)?;
        request.headers.insert(header::AUTHORIZATION, bearer);
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            request.headers.insert(TRACE_ID_HEADER, value);
        }

        match self.client.send(request).await {
            Ok(response) if response.status == StatusCode::OK => Ok(()),
            Ok(response) => {
                tracing::debug!(
                    trace_id,
                    status = response.status.as_u16(),
                    "Token rejected by authentication service"
                );
                Err(DenyReason::InvalidToken)
            }
            Err(e) => {
                tracing::error!(trace_id, "Authentication service unreachable: {e}");
                Err(DenyReason::AuthUnavailable)
            }
        }
    }
}

#[async_trait]
impl GatewayFilter for AuthFilter {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn priority(&self) -> i32 {
        AUTH_PRIORITY
    }

    async fn filter(&self, req: GatewayRequest, next: Next<'_>) -> Option<GatewayResponse> {
        let ctx = next.context();
        let policy = &ctx.snapshot().policies.auth;

        if policy.skip_paths.iter().any(|glob| glob.matches(&req.path)) {
            tracing::trace!(path = %req.path, "Path exempt from authentication");
            return next.run(req).await;
        }

        // Same snapshot as the router: the flag cannot come from another generation.
        // Unmatched paths still need a token so 401 and 404 cannot be told apart.
        if ctx.route(&req).is_some_and(|route| !route.require_auth) {
            return next.run(req).await;
        }

        let Some(token) = extract_token(&req) else {
            tracing::debug!(trace_id = %req.trace_id, path = %req.path, "Missing authentication token");
            return Some(GatewayResponse::denied(DenyReason::MissingToken));
        };

        match self.verify(policy, token, &req.trace_id).await {
            Ok(()) => next.run(req).await,
            Err(reason) => Some(GatewayResponse::denied(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderName;

    use super::*;

    #[test]
    fn bearer_token_is_preferred() {
        let req = GatewayRequest::new(Method::GET, "/")
            .with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc "))
            .with_header(HeaderName::from_static("token"), HeaderValue::from_static("other"));
        assert_eq!(extract_token(&req), Some("abc"));
    }

    #[test]
    fn falls_back_to_token_header() {
        let req = GatewayRequest::new(Method::GET, "/")
            .with_header(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"))
            .with_header(HeaderName::from_static("token"), HeaderValue::from_static("t-1"));
        assert_eq!(extract_token(&req), Some("t-1"));
    }

    #[test]
    fn empty_bearer_is_missing() {
        let req = GatewayRequest::new(Method::GET, "/")
            .with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer    "));
        assert_eq!(extract_token(&req), None);
    }

    #[test]
    fn verify_url_trims_one_slash() {
        assert_eq!(verify_url("http://auth/"), "http://auth/verify");
        assert_eq!(verify_url("http://auth"), "http://auth/verify");
    }
}
