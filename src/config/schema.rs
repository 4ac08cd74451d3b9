//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Deployment environment (controls the `Secure` cookie attribute).
    pub environment: Environment,

    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// CSRF protection settings.
    pub csrf: CsrfConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: cookies are sent without `Secure`.
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight requests on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

/// CSRF protection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CsrfConfig {
    /// Enable the CSRF gate.
    pub enabled: bool,

    /// Name of the cookie holding the server-issued token.
    pub cookie_name: String,

    /// Name of the request header carrying the client-submitted token.
    pub header_name: String,

    /// Cookie lifetime in seconds.
    pub cookie_max_age_secs: u64,

    /// State-changing paths exempt from the check (health checks, webhooks).
    /// An entry matches itself and anything below it.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            cookie_max_age_secs: 24 * 60 * 60,
            exempt_paths: vec!["/health".to_string(), "/api/health".to_string()],
        }
    }
}

/// Which backing store holds rate-limit counters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local map. Only correct for single-instance deployments.
    #[default]
    Memory,
    /// Shared Redis instance with atomic increments.
    Redis,
}

/// Request budget for one category of endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RatePreset {
    /// Window length in seconds.
    pub window_secs: u64,

    /// Requests admitted per window.
    pub max_requests: u64,
}

impl RatePreset {
    pub const fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            window_secs,
            max_requests,
        }
    }
}

/// Endpoint categories with distinct budgets.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RateCategory {
    Read,
    Write,
    Auth,
    Upload,
}

impl RateCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RateCategory::Read => "read",
            RateCategory::Write => "write",
            RateCategory::Auth => "auth",
            RateCategory::Upload => "upload",
        }
    }
}

/// Per-category presets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RatePresets {
    pub read: RatePreset,
    pub write: RatePreset,
    pub auth: RatePreset,
    pub upload: RatePreset,
}

impl RatePresets {
    pub fn get(&self, category: RateCategory) -> RatePreset {
        match category {
            RateCategory::Read => self.read,
            RateCategory::Write => self.write,
            RateCategory::Auth => self.auth,
            RateCategory::Upload => self.upload,
        }
    }
}

impl Default for RatePresets {
    fn default() -> Self {
        Self {
            read: RatePreset::new(100, 60),
            write: RatePreset::new(30, 60),
            auth: RatePreset::new(10, 60),
            upload: RatePreset::new(10, 60),
        }
    }
}

/// Maps a path prefix onto a category, overriding the method-based default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteRule {
    pub path_prefix: String,
    pub category: RateCategory,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Counter store backend.
    pub store: StoreKind,

    /// Connection URL when `store = "redis"`.
    pub redis_url: Option<String>,

    /// Key prefix used in the shared store.
    pub key_prefix: String,

    /// Per-category budgets.
    pub presets: RatePresets,

    /// Path prefix rules, checked in order.
    pub routes: Vec<RouteRule>,

    /// Use the first `X-Forwarded-For` hop as the client address.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,

    /// How often expired windows are evicted from the memory store.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreKind::Memory,
            redis_url: None,
            key_prefix: "ratelimit".to_string(),
            presets: RatePresets::default(),
            routes: vec![
                RouteRule {
                    path_prefix: "/api/auth".to_string(),
                    category: RateCategory::Auth,
                },
                RouteRule {
                    path_prefix: "/api/upload".to_string(),
                    category: RateCategory::Upload,
                },
            ],
            trust_forwarded_for: false,
            sweep_interval_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
