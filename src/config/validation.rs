//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, budgets > 0)
//! - Check that the selected rate-limit store is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::{GuardConfig, RateCategory, StoreKind};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("timeouts.request_secs must be greater than zero")]
    RequestTimeout,

    #[error("csrf.{field} must not be empty")]
    EmptyCsrfField { field: &'static str },

    #[error("csrf.header_name `{0}` is not a valid HTTP header name")]
    HeaderName(String),

    #[error("csrf.cookie_max_age_secs must be greater than zero")]
    CookieMaxAge,

    #[error("csrf.exempt_paths entry `{0}` must start with `/`")]
    ExemptPath(String),

    #[error("rate_limit.presets.{category}: {reason}")]
    Preset {
        category: &'static str,
        reason: &'static str,
    },

    #[error("rate_limit.routes entry `{0}` must start with `/`")]
    RoutePrefix(String),

    #[error("rate_limit.redis_url is required when store = \"redis\"")]
    MissingRedisUrl,

    #[error("rate_limit.store = \"redis\" requires the `redis` cargo feature")]
    RedisUnavailable,

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::RequestTimeout);
    }

    let csrf = &config.csrf;
    if csrf.cookie_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCsrfField { field: "cookie_name" });
    }
    if csrf.header_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCsrfField { field: "header_name" });
    } else if HeaderName::from_bytes(csrf.header_name.as_bytes()).is_err() {
        errors.push(ValidationError::HeaderName(csrf.header_name.clone()));
    }
    if csrf.cookie_max_age_secs == 0 {
        errors.push(ValidationError::CookieMaxAge);
    }
    for path in &csrf.exempt_paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::ExemptPath(path.clone()));
        }
    }

    let rate_limit = &config.rate_limit;
    for category in [
        RateCategory::Read,
        RateCategory::Write,
        RateCategory::Auth,
        RateCategory::Upload,
    ] {
        let preset = rate_limit.presets.get(category);
        if preset.window_secs == 0 {
            errors.push(ValidationError::Preset {
                category: category.as_str(),
                reason: "window_secs must be greater than zero",
            });
        }
        if preset.max_requests == 0 {
            errors.push(ValidationError::Preset {
                category: category.as_str(),
                reason: "max_requests must be greater than zero",
            });
        }
    }
    for rule in &rate_limit.routes {
        if !rule.path_prefix.starts_with('/') {
            errors.push(ValidationError::RoutePrefix(rule.path_prefix.clone()));
        }
    }
    if rate_limit.store == StoreKind::Redis {
        if rate_limit.redis_url.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingRedisUrl);
        }
        if !cfg!(feature = "redis") {
            errors.push(ValidationError::RedisUnavailable);
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
