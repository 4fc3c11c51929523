//! Core gateway orchestration service.
//!
//! The `GatewayService` owns the live [`ConfigStore`], the policy filter chain
//! and the forwarder. [`GatewayService::handle`] is the whole request
//! pipeline: every request is answered with a [`GatewayResponse`], whatever
//! happens inside the chain.
use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures_util::FutureExt;
use tracing::Instrument;

use crate::{
    core::{
        config_store::ConfigStore,
        error::GatewayError,
        filter::{FilterChain, FilterContext, GatewayFilter},
        filters::{AuthFilter, CircuitBreakerFilter, IpWhitelistFilter, RateLimitFilter},
        forwarder::Forwarder,
        request::{GatewayRequest, GatewayResponse, TRACE_ID_HEADER},
    },
    ports::http_client::HttpClient,
    tracing_setup::create_request_span,
};

/// Central orchestrator. Cheap to share behind an `Arc`.
pub struct GatewayService {
    store: Arc<ConfigStore>,
    chain: FilterChain,
    forwarder: Forwarder,
    breakers: Arc<CircuitBreakerFilter>,
}

impl GatewayService {
    /// Build the standard pipeline: whitelist, rate limit, auth, circuit
    /// breaker, then the forwarder.
    pub fn new(store: Arc<ConfigStore>, client: Arc<dyn HttpClient>) -> Self {
        let breakers = Arc::new(CircuitBreakerFilter::new());
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(IpWhitelistFilter::new()),
            Arc::new(RateLimitFilter::new()),
            Arc::new(AuthFilter::new(client.clone())),
            breakers.clone(),
        ];
        Self::with_filters(store, client, filters, breakers)
    }

    /// Like [`GatewayService::new`] with a caller-supplied filter set. The
    /// breaker handle is kept for diagnostics and pruning.
    pub fn with_filters(
        store: Arc<ConfigStore>,
        client: Arc<dyn HttpClient>,
        filters: Vec<Arc<dyn GatewayFilter>>,
        breakers: Arc<CircuitBreakerFilter>,
    ) -> Self {
        let chain = FilterChain::new(filters);
        tracing::debug!(
            filters = ?chain.filters().iter().map(|f| f.name()).collect::<Vec<_>>(),
            "Filter chain assembled"
        );
        Self {
            store,
            chain,
            forwarder: Forwarder::new(client),
            breakers,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerFilter> {
        &self.breakers
    }

    /// Drop breakers of removed routes whenever a snapshot is published.
    pub fn spawn_breaker_pruning(&self) -> tokio::task::JoinHandle<()> {
        let breakers = self.breakers.clone();
        self.store.subscribe(move |snapshot| {
            let breakers = breakers.clone();
            async move { breakers.prune(&snapshot).await }
        })
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, req: GatewayRequest) -> GatewayResponse {
        let ctx = FilterContext::new(self.store.current());
        let trace_id = req.trace_id.clone();
        let method = req.method.clone();
        let path = req.path.clone();
        let started = Instant::now();

        let span = create_request_span(method.as_str(), &path, &trace_id);
        let outcome = AssertUnwindSafe(self.chain.execute_with(&ctx, req, &self.forwarder))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let mut response = match outcome {
            Ok(Some(response)) => response,
            // Only reachable if a filter swallowed the request without answering.
            Ok(None) => GatewayError::Internal("Request was not handled".to_string()).into_response(),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let error = GatewayError::Internal(message);
                tracing::error!(%trace_id, %path, "Pipeline panicked: {error}");
                let status = error.status();
                // The panic message stays in the log; clients only get the trace id.
                GatewayResponse::json(
                    status,
                    &serde_json::json!({
                        "error": "Internal server error",
                        "status": status.as_u16(),
                        "traceId": trace_id,
                    }),
                )
            }
        };
        response.set_header(TRACE_ID_HEADER, &trace_id);

        let elapsed = started.elapsed();
        let route_id = ctx.resolved_route().map_or("-", |route| route.id.as_str());
        span.record("route_id", route_id);
        span.record("http.status_code", response.status.as_u16());
        span.record("duration_ms", elapsed.as_millis() as u64);
        tracing::info!(
            parent: &span,
            %method,
            %path,
            status = response.status.as_u16(),
            route_id,
            generation = ctx.snapshot().generation(),
            latency_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
        response
    }
}
