use std::collections::HashSet;

use http::{HeaderName, HeaderValue};

use crate::{
    config::models::{
        AuthSection, CircuitBreakerSection, GatewayDocument, RateLimitSection, RouteConfig,
    },
    core::{filters::ip_whitelist::IpRule, path_pattern::PathPattern},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate route id '{id}'")]
    DuplicateRoute { id: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ValidationError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Gateway document validator
pub struct DocumentValidator;

impl DocumentValidator {
    /// Validate the entire document, reporting every problem at once.
    pub fn validate(doc: &GatewayDocument) -> ValidationResult<()> {
        let mut errors = Vec::new();

        Self::validate_whitelist(&doc.security.ip_whitelist.list, &mut errors);
        Self::validate_auth(&doc.security.auth, &mut errors);
        Self::validate_rate_limit(&doc.rate_limit, &mut errors);
        Self::validate_circuit_breaker(&doc.circuit_breaker, &mut errors);

        if doc.server.forward_timeout_ms == 0 {
            errors.push(ValidationError::invalid(
                "server.forwardTimeoutMs",
                "Forward timeout must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (index, route) in doc.routes.iter().enumerate() {
            if !route.id.is_empty() && !seen.insert(route.id.as_str()) {
                errors.push(ValidationError::DuplicateRoute {
                    id: route.id.clone(),
                });
            }
            Self::validate_route(index, route, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_whitelist(entries: &[String], errors: &mut Vec<ValidationError>) {
        for (i, entry) in entries.iter().enumerate() {
            if let Err(message) = IpRule::parse(entry) {
                errors.push(ValidationError::invalid(
                    format!("security.ipWhitelist.list[{i}]"),
                    message,
                ));
            }
        }
    }

    fn validate_auth(auth: &AuthSection, errors: &mut Vec<ValidationError>) {
        if let Some(url) = &auth.auth_server_url {
            if let Err(e) = Self::validate_url(url, "security.auth.authServerUrl") {
                errors.push(e);
            }
        }
        if auth.timeout_ms == 0 {
            errors.push(ValidationError::invalid(
                "security.auth.timeoutMs",
                "Auth timeout must be greater than 0",
            ));
        }
        for (i, glob) in auth.skip_paths.iter().enumerate() {
            if let Err(e) = PathPattern::compile(glob) {
                errors.push(ValidationError::invalid(
                    format!("security.auth.skipPaths[{i}]"),
                    e.to_string(),
                ));
            }
        }
    }

    fn validate_rate_limit(rate: &RateLimitSection, errors: &mut Vec<ValidationError>) {
        if rate.algorithm != "token-bucket" {
            errors.push(ValidationError::invalid(
                "rateLimit.algorithm",
                format!(
                    "Unsupported algorithm '{}', only 'token-bucket' is available",
                    rate.algorithm
                ),
            ));
        }
        Self::positive(rate.capacity as u64, "rateLimit.capacity", errors);
        Self::positive(rate.refill_tokens as u64, "rateLimit.refillTokens", errors);
        Self::positive(
            rate.refill_period_seconds,
            "rateLimit.refillPeriodSeconds",
            errors,
        );
    }

    fn validate_circuit_breaker(cb: &CircuitBreakerSection, errors: &mut Vec<ValidationError>) {
        Self::percentage(
            cb.failure_rate_threshold,
            "circuitBreaker.failureRateThreshold",
            errors,
        );
        Self::percentage(
            cb.slow_call_rate_threshold,
            "circuitBreaker.slowCallRateThreshold",
            errors,
        );
        Self::positive(
            cb.sliding_window_size as u64,
            "circuitBreaker.slidingWindowSize",
            errors,
        );
        Self::positive(
            cb.minimum_number_of_calls as u64,
            "circuitBreaker.minimumNumberOfCalls",
            errors,
        );
        Self::positive(
            cb.permitted_calls_in_half_open_state as u64,
            "circuitBreaker.permittedCallsInHalfOpenState",
            errors,
        );
    }

    /// Validate a single route definition
    fn validate_route(index: usize, route: &RouteConfig, errors: &mut Vec<ValidationError>) {
        let name = if route.id.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("routes[{index}].id"),
            });
            format!("routes[{index}]")
        } else {
            format!("route '{}'", route.id)
        };

        if route.path_pattern.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{name} pathPattern"),
            });
        } else if !route.path_pattern.starts_with('/') {
            errors.push(ValidationError::invalid(
                format!("{name} pathPattern"),
                "Path patterns must start with '/'",
            ));
        } else if let Err(e) = PathPattern::compile(&route.path_pattern) {
            errors.push(ValidationError::invalid(
                format!("{name} pathPattern"),
                e.to_string(),
            ));
        }

        if route.targets.is_empty() {
            errors.push(ValidationError::invalid(
                format!("{name} targets"),
                "Routes must have at least one target",
            ));
        }
        for (i, target) in route.targets.iter().enumerate() {
            if let Err(e) = Self::validate_url(target, &format!("{name} target {}", i + 1)) {
                errors.push(e);
            }
        }

        for (header, value) in &route.header_transforms {
            if HeaderName::from_bytes(header.as_bytes()).is_err() {
                errors.push(ValidationError::invalid(
                    format!("{name} headerTransforms"),
                    format!("'{header}' is not a valid header name"),
                ));
            }
            if let Some(value) = value {
                if HeaderValue::from_str(value).is_err() {
                    errors.push(ValidationError::invalid(
                        format!("{name} headerTransforms.{header}"),
                        "Header value contains invalid characters",
                    ));
                }
            }
        }

        if let Some(rate) = &route.rate_limit {
            let field = format!("{name} rateLimit");
            if rate.capacity == Some(0)
                || rate.refill_tokens == Some(0)
                || rate.refill_period_seconds == Some(0)
            {
                errors.push(ValidationError::invalid(
                    field,
                    "capacity, refillTokens and refillPeriodSeconds must be greater than 0",
                ));
            }
        }

        if let Some(cb) = &route.circuit_breaker {
            if let Some(threshold) = cb.failure_rate_threshold {
                Self::percentage(
                    threshold,
                    &format!("{name} circuitBreaker.failureRateThreshold"),
                    errors,
                );
            }
            if cb.sliding_window_size == Some(0) {
                errors.push(ValidationError::invalid(
                    format!("{name} circuitBreaker.slidingWindowSize"),
                    "Must be greater than 0",
                ));
            }
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ValidationError::invalid(
                        context,
                        format!("URL '{url_str}' must use http or https"),
                    ));
                }
                if url.host().is_none() {
                    return Err(ValidationError::invalid(
                        context,
                        format!("URL '{url_str}' must include a host"),
                    ));
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::invalid(
                context,
                format!("Invalid URL '{url_str}': {e}"),
            )),
        }
    }

    fn positive(value: u64, field: &str, errors: &mut Vec<ValidationError>) {
        if value == 0 {
            errors.push(ValidationError::invalid(field, "Must be greater than 0"));
        }
    }

    fn percentage(value: f64, field: &str, errors: &mut Vec<ValidationError>) {
        if !(value > 0.0 && value <= 100.0) {
            errors.push(ValidationError::invalid(
                field,
                format!("{value} is not a percentage in (0, 100]"),
            ));
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} configuration errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
