//! Ordered filter chain with an explicit, single-use continuation.
//!
//! Each filter receives the request and a [`Next`]. It either returns a
//! response of its own (deny) or hands the request on with
//! [`Next::run`]. `Next` is consumed by `run`, so a filter cannot continue
//! the chain twice.
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::core::{
    request::{GatewayRequest, GatewayResponse},
    router::Router,
    snapshot::{ConfigSnapshot, RouteDefinition},
};

pub const IP_WHITELIST_PRIORITY: i32 = 100;
pub const RATE_LIMIT_PRIORITY: i32 = 200;
pub const AUTH_PRIORITY: i32 = 300;
pub const CIRCUIT_BREAKER_PRIORITY: i32 = 400;

/// Per-request view of the configuration.
///
/// The snapshot is loaded once when the request enters the pipeline, and the
/// route lookup is computed at most once against it. Every filter and the
/// forwarder therefore agree on the route and on its flags.
pub struct FilterContext {
    snapshot: Arc<ConfigSnapshot>,
    route: OnceLock<Option<Arc<RouteDefinition>>>,
}

impl FilterContext {
    pub fn new(snapshot: Arc<ConfigSnapshot>) -> Self {
        Self {
            snapshot,
            route: OnceLock::new(),
        }
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn route(&self, req: &GatewayRequest) -> Option<&Arc<RouteDefinition>> {
        self.route
            .get_or_init(|| Router::match_in(&self.snapshot, &req.path))
            .as_ref()
    }

    /// The route if some stage already looked it up.
    pub fn resolved_route(&self) -> Option<&Arc<RouteDefinition>> {
        self.route.get().and_then(Option::as_ref)
    }
}

#[async_trait]
pub trait GatewayFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Disabled filters are skipped as if they had called `next`.
    fn is_enabled(&self, _ctx: &FilterContext) -> bool {
        true
    }

    async fn filter(&self, req: GatewayRequest, next: Next<'_>) -> Option<GatewayResponse>;
}

/// What the chain calls once every filter has passed.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &FilterContext, req: GatewayRequest) -> GatewayResponse;
}

/// The remainder of the chain.
pub struct Next<'a> {
    ctx: &'a FilterContext,
    filters: &'a [Arc<dyn GatewayFilter>],
    endpoint: Option<&'a dyn Endpoint>,
}

impl<'a> Next<'a> {
    pub fn context(&self) -> &'a FilterContext {
        self.ctx
    }

    pub async fn run(self, req: GatewayRequest) -> Option<GatewayResponse> {
        let mut remaining = self.filters;
        while let Some((filter, rest)) = remaining.split_first() {
            if filter.is_enabled(self.ctx) {
                let next = Next {
                    ctx: self.ctx,
                    filters: rest,
                    endpoint: self.endpoint,
                };
                return filter.filter(req, next).await;
            }
            tracing::trace!(filter = filter.name(), "Filter disabled, skipping");
            remaining = rest;
        }

        match self.endpoint {
            Some(endpoint) => Some(endpoint.call(self.ctx, req).await),
            None => None,
        }
    }
}

pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChain {
    pub fn new(mut filters: Vec<Arc<dyn GatewayFilter>>) -> Self {
        filters.sort_by_key(|f| f.priority());
        Self { filters }
    }

    pub fn filters(&self) -> &[Arc<dyn GatewayFilter>] {
        &self.filters
    }

    /// Run the filters only. `None` means every filter let the request through.
    pub async fn execute(&self, ctx: &FilterContext, req: GatewayRequest) -> Option<GatewayResponse> {
        Next {
            ctx,
            filters: &self.filters,
            endpoint: None,
        }
        .run(req)
        .await
    }

    /// Run the filters and then `endpoint`, letting wrapping filters observe
    /// the downstream result.
    pub async fn execute_with(
        &self,
        ctx: &FilterContext,
        req: GatewayRequest,
        endpoint: &dyn Endpoint,
    ) -> Option<GatewayResponse> {
        Next {
            ctx,
            filters: &self.filters,
            endpoint: Some(endpoint),
        }
        .run(req)
        .await
    }
}
