//! Configuration document data structures.
//!
//! These types map directly onto the YAML / JSON document published by the
//! configuration source. Keys are camelCase, and each multi-word key also
//! accepts its kebab-case spelling, so both `pathPattern` and `path-pattern`
//! are valid. Every section carries defaults so that a minimal document stays
//! concise. A document with no `routes` at all is valid: it simply routes
//! nothing.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_forward_timeout_ms() -> u64 {
    30_000
}

fn default_auth_timeout_ms() -> u64 {
    500
}

fn default_algorithm() -> String {
    "token-bucket".to_string()
}

fn default_capacity() -> u32 {
    100
}

fn default_refill_tokens() -> u32 {
    100
}

fn default_refill_period_seconds() -> u64 {
    60
}

/// Treat an explicit `null` the same as an absent key.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Root of a gateway configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayDocument {
    #[serde(deserialize_with = "nullable")]
    pub server: ServerSection,
    #[serde(deserialize_with = "nullable")]
    pub security: SecuritySection,
    #[serde(alias = "rate-limit", deserialize_with = "nullable")]
    pub rate_limit: RateLimitSection,
    #[serde(alias = "circuit-breaker", deserialize_with = "nullable")]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(deserialize_with = "nullable")]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    /// Informational; the listener address comes from the bootstrap settings.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for a single forwarded call.
    #[serde(default = "default_forward_timeout_ms", alias = "forward-timeout-ms")]
    pub forward_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            forward_timeout_ms: default_forward_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SecuritySection {
    #[serde(alias = "ip-whitelist", deserialize_with = "nullable")]
    pub ip_whitelist: IpWhitelistSection,
    #[serde(deserialize_with = "nullable")]
    pub auth: AuthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpWhitelistSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Exact addresses, `localhost`, CIDR blocks or dotted wildcards (`10.0.*.*`).
    #[serde(deserialize_with = "nullable")]
    pub list: Vec<String>,
}

impl Default for IpWhitelistSection {
    fn default() -> Self {
        Self {
            enabled: true,
            list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path globs that never require a token.
    #[serde(alias = "skip-paths", deserialize_with = "nullable")]
    pub skip_paths: Vec<String>,
    /// Base URL of the verification service; `{url}/verify` is called.
    #[serde(alias = "auth-server-url")]
    pub auth_server_url: Option<String>,
    #[serde(default = "default_auth_timeout_ms", alias = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_paths: Vec::new(),
            auth_server_url: None,
            timeout_ms: default_auth_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_tokens", alias = "refill-tokens")]
    pub refill_tokens: u32,
    #[serde(
        default = "default_refill_period_seconds",
        alias = "refill-period-seconds"
    )]
    pub refill_period_seconds: u64,
    #[serde(alias = "per-client", deserialize_with = "nullable")]
    pub per_client: PerClientSection,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: default_algorithm(),
            capacity: default_capacity(),
            refill_tokens: default_refill_tokens(),
            refill_period_seconds: default_refill_period_seconds(),
            per_client: PerClientSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerClientSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PerClientSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerSection {
    pub enabled: bool,
    /// Percent of failed calls in the window that opens the breaker.
    #[serde(alias = "failure-rate-threshold")]
    pub failure_rate_threshold: f64,
    #[serde(alias = "wait-duration-open-state-seconds")]
    pub wait_duration_open_state_seconds: u64,
    #[serde(alias = "sliding-window-size")]
    pub sliding_window_size: u32,
    #[serde(alias = "slow-call-duration-threshold-ms")]
    pub slow_call_duration_threshold_ms: u64,
    /// Percent of slow calls in the window that opens the breaker.
    #[serde(alias = "slow-call-rate-threshold")]
    pub slow_call_rate_threshold: f64,
    #[serde(alias = "minimum-number-of-calls")]
    pub minimum_number_of_calls: u32,
    #[serde(alias = "permitted-calls-in-half-open-state")]
    pub permitted_calls_in_half_open_state: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            wait_duration_open_state_seconds: 30,
            sliding_window_size: 20,
            slow_call_duration_threshold_ms: 2000,
            slow_call_rate_threshold: 80.0,
            minimum_number_of_calls: 10,
            permitted_calls_in_half_open_state: 1,
        }
    }
}

/// One entry of the `routes` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteConfig {
    pub id: String,
    #[serde(alias = "path-pattern")]
    pub path_pattern: String,
    #[serde(deserialize_with = "nullable")]
    pub targets: Vec<String>,
    #[serde(alias = "strip-prefix")]
    pub strip_prefix: bool,
    #[serde(default = "default_true", alias = "require-auth")]
    pub require_auth: bool,
    /// `None`, `""` or `"null"` removes the header; anything else sets it.
    #[serde(alias = "header-transforms", deserialize_with = "nullable")]
    pub header_transforms: HashMap<String, Option<String>>,
    #[serde(alias = "rate-limit")]
    pub rate_limit: Option<RouteRateLimitConfig>,
    #[serde(alias = "circuit-breaker")]
    pub circuit_breaker: Option<RouteCircuitBreakerConfig>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            path_pattern: String::new(),
            targets: Vec::new(),
            strip_prefix: false,
            require_auth: true,
            header_transforms: HashMap::new(),
            rate_limit: None,
            circuit_breaker: None,
        }
    }
}

impl RouteConfig {
    /// Start a route definition with the mandatory fields.
    pub fn new(id: impl Into<String>, path_pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path_pattern: path_pattern.into(),
            ..Self::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    pub fn require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.header_transforms
            .insert(name.into(), value.map(str::to_string));
        self
    }
}

/// Route-scoped bucket, checked in addition to the global one. Unset numbers
/// inherit the global rate-limit values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteRateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub capacity: Option<u32>,
    #[serde(alias = "refill-tokens")]
    pub refill_tokens: Option<u32>,
    #[serde(alias = "refill-period-seconds")]
    pub refill_period_seconds: Option<u64>,
}

impl Default for RouteRateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: None,
            refill_tokens: None,
            refill_period_seconds: None,
        }
    }
}

/// Route-scoped breaker parameters. Unset fields inherit the global policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteCircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(alias = "failure-rate-threshold")]
    pub failure_rate_threshold: Option<f64>,
    #[serde(alias = "wait-duration-seconds")]
    pub wait_duration_seconds: Option<u64>,
    #[serde(alias = "sliding-window-size")]
    pub sliding_window_size: Option<u32>,
}

impl Default for RouteCircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: None,
            wait_duration_seconds: None,
            sliding_window_size: None,
        }
    }
}
