pub mod auth;
pub mod circuit_breaker;
pub mod ip_whitelist;
pub mod rate_limit;

pub use auth::AuthFilter;
pub use circuit_breaker::{BreakerState, BreakerStatus, CircuitBreaker, CircuitBreakerFilter};
pub use ip_whitelist::{IpRule, IpWhitelistFilter};
pub use rate_limit::RateLimitFilter;
