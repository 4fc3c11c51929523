//! Per-route circuit breakers over a count-based sliding window.
//!
//! State machine:
//! * `Closed`: calls flow; outcomes fill the window. Once the window holds at
//!   least `minimum_calls` samples and the failure or slow-call rate reaches
//!   its threshold, the breaker opens.
//! * `Open`: calls are rejected without reaching the backend until
//!   `wait_duration` has elapsed, after which the next call moves the
//!   breaker to `HalfOpen`.
//! * `HalfOpen`: `half_open_permits` trial calls are admitted. Any failed or
//!   slow trial reopens the breaker; when every trial succeeds it closes
//!   with a fresh window.
//!
//! Every state change bumps an epoch. Results of calls admitted under an
//! earlier epoch are discarded, so a slow call started while closed cannot
//! be mistaken for a half-open trial.
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use scc::HashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::core::{
    error::DenyReason,
    filter::{CIRCUIT_BREAKER_PRIORITY, FilterContext, GatewayFilter, Next},
    request::{GatewayRequest, GatewayResponse},
    snapshot::{BreakerPolicy, ConfigSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("CLOSED"),
            BreakerState::Open => f.write_str("OPEN"),
            BreakerState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub failed: bool,
    pub slow: bool,
}

impl CallOutcome {
    pub const SUCCESS: CallOutcome = CallOutcome {
        failed: false,
        slow: false,
    };
    pub const FAILURE: CallOutcome = CallOutcome {
        failed: true,
        slow: false,
    };

    /// Classify a downstream response. 5xx is a failure; latency at or above
    /// the policy threshold is slow. Client errors count as successes since
    /// the backend did answer.
    pub fn classify(response: &GatewayResponse, elapsed: Duration, policy: &BreakerPolicy) -> Self {
        Self {
            failed: response.status.is_server_error(),
            slow: elapsed >= policy.slow_call_duration,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window: VecDeque<CallOutcome>,
    open_until: Option<Instant>,
    trials_in_flight: usize,
    trial_successes: usize,
    epoch: u64,
}

/// Admission for one call. Dropping it without [`CallPermit::record`]
/// releases the slot without counting an outcome.
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    epoch: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn record(mut self, outcome: CallOutcome, now: Instant) {
        self.settled = true;
        self.breaker.on_result(self.epoch, self.trial, outcome, now);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.epoch, self.trial);
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::with_capacity(policy.sliding_window_size),
                open_until: None,
                trials_in_flight: 0,
                trial_successes: 0,
                epoch: 0,
            }),
            policy,
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, advancing `Open` to `HalfOpen` if the wait has elapsed.
    pub fn state(&self, now: Instant) -> BreakerState {
        let mut inner = self.lock();
        self.advance(&mut inner, now);
        inner.state
    }

    /// Ask to place a call. `None` means the breaker rejects it.
    pub fn try_acquire(self: &Arc<Self>, now: Instant) -> Option<CallPermit> {
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => return None,
            BreakerState::HalfOpen => {
                if inner.trials_in_flight + inner.trial_successes >= self.policy.half_open_permits {
                    return None;
                }
                inner.trials_in_flight += 1;
                true
            }
        };

        Some(CallPermit {
            breaker: self.clone(),
            epoch: inner.epoch,
            trial,
            settled: false,
        })
    }

    /// Force `Closed` with an empty window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, BreakerState::Closed, None);
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    fn advance(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open && inner.open_until.is_some_and(|until| now >= until) {
            self.transition(inner, BreakerState::HalfOpen, None);
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting trial calls");
        }
    }

    fn transition(&self, inner: &mut Inner, state: BreakerState, open_until: Option<Instant>) {
        inner.state = state;
        inner.open_until = open_until;
        inner.window.clear();
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;
        inner.epoch += 1;
    }

    fn trip(&self, inner: &mut Inner, now: Instant, reason: &str) {
        self.transition(
            inner,
            BreakerState::Open,
            Some(now + self.policy.wait_duration),
        );
        tracing::warn!(
            breaker = %self.name,
            wait_secs = self.policy.wait_duration.as_secs(),
            "Circuit breaker opened: {reason}"
        );
    }

    fn on_result(&self, epoch: u64, trial: bool, outcome: CallOutcome, now: Instant) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.window.push_back(outcome);
                while inner.window.len() > self.policy.sliding_window_size {
                    inner.window.pop_front();
                }

                let samples = inner.window.len();
                let required = self.policy.minimum_calls.min(self.policy.sliding_window_size);
                if samples < required.max(1) {
                    return;
                }
                let failures = inner.window.iter().filter(|o| o.failed).count();
                let slow = inner.window.iter().filter(|o| o.slow).count();
                let failure_rate = failures as f64 * 100.0 / samples as f64;
                let slow_rate = slow as f64 * 100.0 / samples as f64;

                if failure_rate >= self.policy.failure_rate_threshold {
                    let reason = format!("failure rate {failure_rate:.1}% over {samples} calls");
                    self.trip(&mut inner, now, &reason);
                } else if slow_rate >= self.policy.slow_call_rate_threshold {
                    let reason = format!("slow call rate {slow_rate:.1}% over {samples} calls");
                    self.trip(&mut inner, now, &reason);
                }
            }
            BreakerState::HalfOpen if trial => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                if outcome.failed || outcome.slow {
                    self.trip(&mut inner, now, "trial call failed");
                } else {
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.policy.half_open_permits {
                        self.transition(&mut inner, BreakerState::Closed, None);
                        tracing::info!(breaker = %self.name, "Circuit breaker closed");
                    }
                }
            }
            _ => {}
        }
    }

    fn on_release(&self, epoch: u64, trial: bool) {
        let mut inner = self.lock();
        if trial && inner.epoch == epoch && inner.state == BreakerState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }
}

/// Breaker state reported for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub route_id: String,
    pub state: BreakerState,
}

pub struct CircuitBreakerFilter {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerFilter {
    pub fn new() -> Self {
        Self {
            breakers: HashMap::new(),
        }
    }

    /// The breaker for `route_id`, created lazily and replaced if the
    /// effective policy changed since it was built.
    async fn breaker_for(&self, route_id: &str, policy: &BreakerPolicy) -> Arc<CircuitBreaker> {
        let existing = self
            .breakers
            .read_async(route_id, |_, breaker| {
                (breaker.policy() == policy).then(|| breaker.clone())
            })
            .await
            .flatten();
        if let Some(breaker) = existing {
            return breaker;
        }

        let fresh = Arc::new(CircuitBreaker::new(route_id, policy.clone()));
        let mut chosen = fresh.clone();
        self.breakers
            .entry_async(route_id.to_string())
            .await
            .and_modify(|slot| {
                if slot.policy() == policy {
                    chosen = slot.clone();
                } else {
                    *slot = fresh.clone();
                }
            })
            .or_insert_with(|| fresh.clone());
        chosen
    }

    /// Force a route's breaker closed. Returns false for unknown routes.
    pub async fn reset(&self, route_id: &str) -> bool {
        self.breakers
            .read_async(route_id, |_, breaker| breaker.reset())
            .await
            .is_some()
    }

    pub async fn state(&self, route_id: &str) -> Option<BreakerState> {
        let now = Instant::now();
        self.breakers
            .read_async(route_id, |_, breaker| breaker.state(now))
            .await
    }

    pub async fn states(&self) -> Vec<BreakerStatus> {
        let now = Instant::now();
        let mut states = Vec::new();
        self.breakers
            .retain_async(|route_id, breaker| {
                states.push(BreakerStatus {
                    route_id: route_id.clone(),
                    state: breaker.state(now),
                });
                true
            })
            .await;
        states.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        states
    }

    /// Drop breakers for routes that no longer exist.
    pub async fn prune(&self, snapshot: &ConfigSnapshot) {
        self.breakers
            .retain_async(|route_id, _| snapshot.route(route_id).is_some())
            .await;
    }
}

impl Default for CircuitBreakerFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayFilter for CircuitBreakerFilter {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn priority(&self) -> i32 {
        CIRCUIT_BREAKER_PRIORITY
    }

    fn is_enabled(&self, ctx: &FilterContext) -> bool {
        ctx.snapshot().policies.breaker_enabled
    }

    async fn filter(&self, req: GatewayRequest, next: Next<'_>) -> Option<GatewayResponse> {
        let ctx = next.context();
        // Nothing to protect without a route.
        let Some(route) = ctx.route(&req).cloned() else {
            return next.run(req).await;
        };

        let breaker = self.breaker_for(&route.id, &route.breaker).await;
        let Some(permit) = breaker.try_acquire(Instant::now()) else {
            tracing::warn!(
                route_id = %route.id,
                trace_id = %req.trace_id,
                "Circuit breaker rejected call"
            );
            return Some(GatewayResponse::denied(DenyReason::Breaker {
                route_id: route.id.clone(),
            }));
        };

        let started = Instant::now();
        let result = next.run(req).await;
        let elapsed = started.elapsed();

        match &result {
            Some(response) if !response.is_denial() => {
                permit.record(
                    CallOutcome::classify(response, elapsed, &route.breaker),
                    Instant::now(),
                );
            }
            // Upstream denials and empty results say nothing about the backend.
            _ => drop(permit),
        }
        result
    }
}
