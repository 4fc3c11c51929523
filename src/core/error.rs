use http::StatusCode;
use thiserror::Error;

use crate::{config::error::ConfigError, core::request::GatewayResponse};

/// Why a policy filter refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("IP {ip} is not in whitelist")]
    Ip { ip: String },

    #[error("Global rate limit exceeded")]
    GlobalRate,

    #[error("Route rate limit exceeded for route: {route_id}")]
    RouteRate { route_id: String },

    #[error("Client rate limit exceeded for IP: {ip}")]
    ClientRate { ip: String },

    #[error("Missing authentication token, please authenticate at the authentication service")]
    MissingToken,

    #[error(
        "Invalid authentication token, please re-authenticate at the authentication service"
    )]
    InvalidToken,

    #[error("Authentication service unavailable, please try again later")]
    AuthUnavailable,

    #[error("Circuit breaker is open for route: {route_id}")]
    Breaker { route_id: String },
}

impl DenyReason {
    pub fn status(&self) -> StatusCode {
        match self {
            DenyReason::Ip { .. } => StatusCode::FORBIDDEN,
            DenyReason::GlobalRate | DenyReason::RouteRate { .. } | DenyReason::ClientRate { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            DenyReason::MissingToken | DenyReason::InvalidToken => StatusCode::UNAUTHORIZED,
            // Could not ask, as opposed to was told no.
            DenyReason::AuthUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            DenyReason::Breaker { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Gateway error taxonomy. Every variant maps onto a response; none of them
/// ever terminates the process. Policy refusals are [`DenyReason`] values
/// carried on the response, not errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No route found for path: {path}")]
    RouteNotFound { path: String },

    #[error("No target available for route: {route_id}")]
    NoTarget { route_id: String },

    #[error("Failed to build target URL: {0}")]
    InvalidTarget(String),

    #[error("Forward failed: {0}")]
    Forward(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> GatewayResponse {
        GatewayResponse::error(self.status(), self.to_string())
    }
}
