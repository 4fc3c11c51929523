//! Token-bucket rate limiting built atop `governor`.
//!
//! Three scopes are checked in order, each short-circuiting the next:
//! the global bucket, an optional route bucket, and (when enabled) a bucket
//! per client IP. Buckets survive configuration reloads unless their own
//! parameters change.
use std::{num::NonZeroU32, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use scc::HashMap;

use crate::core::{
    error::DenyReason,
    filter::{FilterContext, GatewayFilter, Next, RATE_LIMIT_PRIORITY},
    request::{GatewayRequest, GatewayResponse},
    snapshot::BucketSpec,
};

pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Once the client map grows past this many keys it is reset.
pub const MAX_CLIENT_BUCKETS: usize = 10_000;

/// Build a bucket holding `capacity` tokens and gaining `refill_tokens`
/// tokens every `refill_period`, spread evenly across the period.
pub fn token_bucket(spec: &BucketSpec) -> DirectRateLimiter {
    let burst = NonZeroU32::new(spec.capacity).unwrap_or(NonZeroU32::MIN);
    let cell_interval = spec.refill_period / spec.refill_tokens.max(1);
    let quota = Quota::with_period(cell_interval)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);
    RateLimiter::direct(quota)
}

struct Limiters {
    global_spec: BucketSpec,
    global: DirectRateLimiter,
    client_spec: BucketSpec,
    clients: HashMap<String, Arc<DirectRateLimiter>>,
    routes: HashMap<String, (BucketSpec, Arc<DirectRateLimiter>)>,
}

impl Limiters {
    fn new(global_spec: BucketSpec) -> Self {
        tracing::info!(
            capacity = global_spec.capacity,
            refill_tokens = global_spec.refill_tokens,
            refill_period_secs = global_spec.refill_period.as_secs(),
            "Creating rate limiter buckets"
        );
        let client_spec = global_spec.per_client();
        Self {
            global_spec,
            global: token_bucket(&global_spec),
            client_spec,
            clients: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    async fn client(&self, ip: &str) -> Arc<DirectRateLimiter> {
        if let Some(limiter) = self.clients.read_async(ip, |_, l| l.clone()).await {
            return limiter;
        }
        if self.clients.len() > MAX_CLIENT_BUCKETS {
            tracing::info!(
                buckets = self.clients.len(),
                "Client bucket map over capacity, resetting"
            );
            self.clients.clear_async().await;
        }
        let spec = self.client_spec;
        self.clients
            .entry_async(ip.to_string())
            .await
            .or_insert_with(|| Arc::new(token_bucket(&spec)))
            .get()
            .clone()
    }

    async fn route(&self, route_id: &str, spec: BucketSpec) -> Arc<DirectRateLimiter> {
        let existing = self
            .routes
            .read_async(route_id, |_, (current, limiter)| {
                (*current == spec).then(|| limiter.clone())
            })
            .await
            .flatten();
        if let Some(limiter) = existing {
            return limiter;
        }

        let limiter = Arc::new(token_bucket(&spec));
        let replacement = (spec, limiter.clone());
        self.routes
            .entry_async(route_id.to_string())
            .await
            .and_modify(|slot| *slot = replacement.clone())
            .or_insert_with(|| replacement.clone());
        limiter
    }
}

pub struct RateLimitFilter {
    limiters: ArcSwap<Limiters>,
}

impl RateLimitFilter {
    pub fn new() -> Self {
        Self {
            limiters: ArcSwap::from_pointee(Limiters::new(BucketSpec {
                capacity: 100,
                refill_tokens: 100,
                refill_period: std::time::Duration::from_secs(60),
            })),
        }
    }

    /// Buckets matching the given global parameters, rebuilt on change.
    fn limiters_for(&self, spec: BucketSpec) -> Arc<Limiters> {
        let current = self.limiters.load_full();
        if current.global_spec == spec {
            return current;
        }
        let fresh = Arc::new(Limiters::new(spec));
        let previous = self.limiters.compare_and_swap(&current, fresh.clone());
        if Arc::ptr_eq(&previous, &current) {
            fresh
        } else {
            // Another request already swapped; use whatever won.
            self.limiters.load_full()
        }
    }
}

impl Default for RateLimitFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayFilter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn priority(&self) -> i32 {
        RATE_LIMIT_PRIORITY
    }

    fn is_enabled(&self, ctx: &FilterContext) -> bool {
        ctx.snapshot().policies.rate_limit.enabled
    }

    async fn filter(&self, req: GatewayRequest, next: Next<'_>) -> Option<GatewayResponse> {
        let ctx = next.context();
        let policy = &ctx.snapshot().policies.rate_limit;
        let limiters = self.limiters_for(policy.global);

        if limiters.global.check().is_err() {
            tracing::warn!(trace_id = %req.trace_id, "Global rate limit exceeded");
            return Some(GatewayResponse::denied(DenyReason::GlobalRate));
        }

        if let Some(route) = ctx.route(&req) {
            if let Some(spec) = route.rate_limit {
                if limiters.route(&route.id, spec).await.check().is_err() {
                    tracing::warn!(
                        route_id = %route.id,
                        trace_id = %req.trace_id,
                        "Route rate limit exceeded"
                    );
                    return Some(GatewayResponse::denied(DenyReason::RouteRate {
                        route_id: route.id.clone(),
                    }));
                }
            }
        }

        if policy.per_client && limiters.client(&req.client_ip).await.check().is_err() {
            tracing::warn!(
                client_ip = %req.client_ip,
                trace_id = %req.trace_id,
                "Client rate limit exceeded"
            );
            return Some(GatewayResponse::denied(DenyReason::ClientRate {
                ip: req.client_ip.clone(),
            }));
        }

        next.run(req).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn spec(capacity: u32, refill_tokens: u32, secs: u64) -> BucketSpec {
        BucketSpec {
            capacity,
            refill_tokens,
            refill_period: Duration::from_secs(secs),
        }
    }

    #[test]
    fn single_token_bucket_rejects_second_call() {
        let bucket = token_bucket(&spec(1, 1, 60));
        assert!(bucket.check().is_ok());
        assert!(bucket.check().is_err());
    }

    #[test]
    fn bucket_allows_bursts_up_to_capacity() {
        let bucket = token_bucket(&spec(5, 1, 60));
        for _ in 0..5 {
            assert!(bucket.check().is_ok());
        }
        assert!(bucket.check().is_err());
    }

    #[test]
    fn parameters_change_rebuilds_buckets() {
        let filter = RateLimitFilter::new();
        let first = filter.limiters_for(spec(1, 1, 60));
        let same = filter.limiters_for(spec(1, 1, 60));
        assert!(Arc::ptr_eq(&first, &same));

        let changed = filter.limiters_for(spec(2, 1, 60));
        assert!(!Arc::ptr_eq(&first, &changed));
    }

    #[tokio::test]
    async fn client_buckets_are_independent() {
        let limiters = Limiters::new(spec(10, 10, 60));
        // Client bucket is a tenth: one token.
        assert!(limiters.client("1.1.1.1").await.check().is_ok());
        assert!(limiters.client("1.1.1.1").await.check().is_err());
        assert!(limiters.client("2.2.2.2").await.check().is_ok());
    }

    #[tokio::test]
    async fn client_map_is_bounded() {
        let limiters = Limiters::new(spec(100, 100, 60));
        for i in 0..=MAX_CLIENT_BUCKETS {
            limiters.client(&format!("client-{i}")).await;
        }
        assert!(limiters.clients.len() <= MAX_CLIENT_BUCKETS + 1);
        limiters.client("one-more").await;
        assert!(limiters.clients.len() <= MAX_CLIENT_BUCKETS + 1);
    }

    #[tokio::test]
    async fn route_bucket_rebuilt_when_spec_changes() {
        let limiters = Limiters::new(spec(100, 100, 60));
        let a = limiters.route("r", spec(1, 1, 60)).await;
        let b = limiters.route("r", spec(1, 1, 60)).await;
        assert!(Arc::ptr_eq(&a, &b));
        let c = limiters.route("r", spec(3, 1, 60)).await;
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
