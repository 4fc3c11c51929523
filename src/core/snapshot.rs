//! Immutable, fully-compiled configuration for one generation.
//!
//! A [`ConfigSnapshot`] is built from a validated [`GatewayDocument`] and is
//! never modified afterwards. Everything the request path needs is compiled
//! up front: path patterns, whitelist rules, effective per-route policies and
//! the route list already sorted most-specific-first.
use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::Duration,
};

use http::{HeaderName, HeaderValue};

use crate::{
    config::{
        error::ConfigError,
        models::{CircuitBreakerSection, GatewayDocument, RouteConfig},
        validation::{DocumentValidator, ValidationError},
    },
    core::{filters::ip_whitelist::IpRule, path_pattern::PathPattern},
};

/// Parameters of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketSpec {
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_period: Duration,
}

impl BucketSpec {
    /// The per-client bucket: a tenth of the global one, at least one token.
    pub fn per_client(&self) -> Self {
        Self {
            capacity: (self.capacity / 10).max(1),
            refill_tokens: (self.refill_tokens / 10).max(1),
            refill_period: self.refill_period,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub global: BucketSpec,
    pub per_client: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerPolicy {
    pub failure_rate_threshold: f64,
    pub slow_call_rate_threshold: f64,
    pub slow_call_duration: Duration,
    pub wait_duration: Duration,
    pub sliding_window_size: usize,
    pub minimum_calls: usize,
    pub half_open_permits: usize,
}

impl From<&CircuitBreakerSection> for BreakerPolicy {
    fn from(section: &CircuitBreakerSection) -> Self {
        Self {
            failure_rate_threshold: section.failure_rate_threshold,
            slow_call_rate_threshold: section.slow_call_rate_threshold,
            slow_call_duration: Duration::from_millis(section.slow_call_duration_threshold_ms),
            wait_duration: Duration::from_secs(section.wait_duration_open_state_seconds),
            sliding_window_size: section.sliding_window_size as usize,
            minimum_calls: section.minimum_number_of_calls as usize,
            half_open_permits: section.permitted_calls_in_half_open_state as usize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhitelistPolicy {
    pub enabled: bool,
    pub rules: Vec<IpRule>,
}

impl WhitelistPolicy {
    /// A disabled whitelist or an empty list admits everyone.
    pub fn admits(&self, client_ip: &str) -> bool {
        !self.enabled || self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(client_ip))
    }
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub skip_paths: Vec<PathPattern>,
    pub server_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Policies {
    pub whitelist: WhitelistPolicy,
    pub auth: AuthPolicy,
    pub rate_limit: RateLimitPolicy,
    pub breaker_enabled: bool,
    pub breaker: BreakerPolicy,
    pub forward_timeout: Duration,
}

/// Header rewrite applied last when forwarding.
#[derive(Debug, Clone)]
pub enum HeaderTransform {
    Set(HeaderName, HeaderValue),
    Remove(HeaderName),
}

#[derive(Debug)]
pub struct RouteDefinition {
    pub id: String,
    pub pattern: PathPattern,
    pub targets: Vec<String>,
    pub strip_prefix: bool,
    pub require_auth: bool,
    pub header_transforms: Vec<HeaderTransform>,
    /// Effective route bucket, present only when the override is enabled.
    pub rate_limit: Option<BucketSpec>,
    /// Effective breaker policy for this route.
    pub breaker: BreakerPolicy,
    /// Round-robin position; lives and dies with this snapshot.
    pub(crate) cursor: AtomicUsize,
}

impl RouteDefinition {
    fn build(config: &RouteConfig, policies: &Policies) -> Result<Self, ConfigError> {
        let pattern = PathPattern::compile(&config.path_pattern).map_err(|e| {
            ValidationError::InvalidField {
                field: format!("route '{}' pathPattern", config.id),
                message: e.to_string(),
            }
        })?;

        let mut header_transforms = Vec::with_capacity(config.header_transforms.len());
        for (name, value) in &config.header_transforms {
            let invalid = |message: &str| ValidationError::InvalidField {
                field: format!("route '{}' headerTransforms.{name}", config.id),
                message: message.to_string(),
            };
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid("invalid header name"))?;
            let transform = match value.as_deref().map(str::trim) {
                None | Some("") => HeaderTransform::Remove(header),
                Some(v) if v.eq_ignore_ascii_case("null") => HeaderTransform::Remove(header),
                Some(v) => HeaderTransform::Set(
                    header,
                    HeaderValue::from_str(v).map_err(|_| invalid("invalid header value"))?,
                ),
            };
            header_transforms.push(transform);
        }

        let global = policies.rate_limit.global;
        let rate_limit = config
            .rate_limit
            .as_ref()
            .filter(|r| r.enabled)
            .map(|r| BucketSpec {
                capacity: r.capacity.unwrap_or(global.capacity),
                refill_tokens: r.refill_tokens.unwrap_or(global.refill_tokens),
                refill_period: r
                    .refill_period_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(global.refill_period),
            });

        let mut breaker = policies.breaker.clone();
        if let Some(cb) = config.circuit_breaker.as_ref().filter(|cb| cb.enabled) {
            if let Some(threshold) = cb.failure_rate_threshold {
                breaker.failure_rate_threshold = threshold;
            }
            if let Some(wait) = cb.wait_duration_seconds {
                breaker.wait_duration = Duration::from_secs(wait);
            }
            if let Some(size) = cb.sliding_window_size {
                breaker.sliding_window_size = size as usize;
            }
        }

        Ok(Self {
            id: config.id.clone(),
            pattern,
            targets: config.targets.clone(),
            strip_prefix: config.strip_prefix,
            require_auth: config.require_auth,
            header_transforms,
            rate_limit,
            breaker,
            cursor: AtomicUsize::new(0),
        })
    }
}

#[derive(Debug)]
pub struct ConfigSnapshot {
    generation: u64,
    digest: Option<u64>,
    routes: Vec<Arc<RouteDefinition>>,
    pub policies: Policies,
}

impl ConfigSnapshot {
    /// Validate and compile a document. The generation is assigned on publish.
    pub fn build(doc: &GatewayDocument) -> Result<Self, ConfigError> {
        DocumentValidator::validate(doc)?;

        let mut rules = Vec::with_capacity(doc.security.ip_whitelist.list.len());
        for (i, entry) in doc.security.ip_whitelist.list.iter().enumerate() {
            rules.push(IpRule::parse(entry).map_err(|message| {
                ValidationError::InvalidField {
                    field: format!("security.ipWhitelist.list[{i}]"),
                    message,
                }
            })?);
        }

        let mut skip_paths = Vec::with_capacity(doc.security.auth.skip_paths.len());
        for glob in &doc.security.auth.skip_paths {
            skip_paths.push(PathPattern::compile(glob).map_err(|e| {
                ValidationError::InvalidField {
                    field: "security.auth.skipPaths".to_string(),
                    message: e.to_string(),
                }
            })?);
        }

        let rate = &doc.rate_limit;
        let policies = Policies {
            whitelist: WhitelistPolicy {
                enabled: doc.security.ip_whitelist.enabled,
                rules,
            },
            auth: AuthPolicy {
                skip_paths,
                server_url: doc
                    .security
                    .auth
                    .auth_server_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
                timeout: Duration::from_millis(doc.security.auth.timeout_ms),
            },
            rate_limit: RateLimitPolicy {
                enabled: rate.enabled,
                global: BucketSpec {
                    capacity: rate.capacity,
                    refill_tokens: rate.refill_tokens,
                    refill_period: Duration::from_secs(rate.refill_period_seconds),
                },
                per_client: rate.per_client.enabled,
            },
            breaker_enabled: doc.circuit_breaker.enabled,
            breaker: BreakerPolicy::from(&doc.circuit_breaker),
            forward_timeout: Duration::from_millis(doc.server.forward_timeout_ms),
        };

        let mut routes = doc
            .routes
            .iter()
            .map(|route| RouteDefinition::build(route, &policies).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        // Stable: equal lengths keep declaration order.
        routes.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));

        Ok(Self {
            generation: 0,
            digest: None,
            routes,
            policies,
        })
    }

    /// The generation-zero snapshot served before any document arrives.
    pub fn empty() -> Self {
        // The default document is always valid.
        match Self::build(&GatewayDocument::default()) {
            Ok(snapshot) => snapshot,
            Err(e) => unreachable!("default gateway document rejected: {e}"),
        }
    }

    pub(crate) fn with_digest(mut self, digest: u64) -> Self {
        self.digest = Some(digest);
        self
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hash of the document this snapshot was built from, if any.
    pub fn digest(&self) -> Option<u64> {
        self.digest
    }

    /// Routes, most specific first.
    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.routes
    }

    pub fn route(&self, id: &str) -> Option<&Arc<RouteDefinition>> {
        self.routes.iter().find(|route| route.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{RouteCircuitBreakerConfig, RouteRateLimitConfig};

    fn doc_with(routes: Vec<RouteConfig>) -> GatewayDocument {
        GatewayDocument {
            routes,
            ..GatewayDocument::default()
        }
    }

    #[test]
    fn routes_sorted_longest_first_with_stable_ties() {
        let snapshot = ConfigSnapshot::build(&doc_with(vec![
            RouteConfig::new("api", "/api/**").target("http://a"),
            RouteConfig::new("tie-1", "/aaa/**").target("http://b"),
            RouteConfig::new("device", "/api/device/**").target("http://c"),
            RouteConfig::new("tie-2", "/bbb/**").target("http://d"),
        ]))
        .unwrap();

        let ids: Vec<&str> = snapshot.routes().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["device", "api", "tie-1", "tie-2"]);
    }

    #[test]
    fn invalid_document_is_rejected() {
        let err = ConfigSnapshot::build(&doc_with(vec![RouteConfig::new("x", "/x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn header_transform_null_and_empty_remove() {
        let snapshot = ConfigSnapshot::build(&doc_with(vec![
            RouteConfig::new("r", "/r/**")
                .target("http://r")
                .header("X-Remove-1", None)
                .header("X-Remove-2", Some(""))
                .header("X-Remove-3", Some("NULL"))
                .header("X-Set", Some("v")),
        ]))
        .unwrap();

        let route = snapshot.route("r").unwrap();
        let removes = route
            .header_transforms
            .iter()
            .filter(|t| matches!(t, HeaderTransform::Remove(_)))
            .count();
        assert_eq!(removes, 3);
        assert!(route.header_transforms.iter().any(
            |t| matches!(t, HeaderTransform::Set(name, value) if name == "x-set" && value == "v")
        ));
    }

    #[test]
    fn route_overrides_inherit_unset_fields() {
        let mut route = RouteConfig::new("r", "/r/**").target("http://r");
        route.rate_limit = Some(RouteRateLimitConfig {
            capacity: Some(5),
            ..RouteRateLimitConfig::default()
        });
        route.circuit_breaker = Some(RouteCircuitBreakerConfig {
            sliding_window_size: Some(4),
            ..RouteCircuitBreakerConfig::default()
        });
        let snapshot = ConfigSnapshot::build(&doc_with(vec![route])).unwrap();
        let route = snapshot.route("r").unwrap();

        let bucket = route.rate_limit.expect("override enabled");
        assert_eq!(bucket.capacity, 5);
        assert_eq!(bucket.refill_tokens, 100);
        assert_eq!(bucket.refill_period, Duration::from_secs(60));

        assert_eq!(route.breaker.sliding_window_size, 4);
        assert_eq!(route.breaker.failure_rate_threshold, 50.0);
    }

    #[test]
    fn disabled_route_override_is_ignored() {
        let mut route = RouteConfig::new("r", "/r/**").target("http://r");
        route.rate_limit = Some(RouteRateLimitConfig {
            enabled: false,
            capacity: Some(1),
            ..RouteRateLimitConfig::default()
        });
        let snapshot = ConfigSnapshot::build(&doc_with(vec![route])).unwrap();
        assert!(snapshot.route("r").unwrap().rate_limit.is_none());
    }

    #[test]
    fn per_client_bucket_is_a_tenth_with_floor() {
        let spec = BucketSpec {
            capacity: 100,
            refill_tokens: 5,
            refill_period: Duration::from_secs(60),
        };
        let client = spec.per_client();
        assert_eq!(client.capacity, 10);
        assert_eq!(client.refill_tokens, 1);
        assert_eq!(client.refill_period, spec.refill_period);
    }

    #[test]
    fn empty_snapshot_has_no_routes() {
        let snapshot = ConfigSnapshot::empty();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.routes().is_empty());
        assert!(snapshot.digest().is_none());
    }
}
