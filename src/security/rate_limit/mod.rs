//! Fixed-window rate limiting with pluggable counter stores.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → middleware.rs (resolve client identity + category)
//!     → RateLimiter::check (preset for the category)
//!     → RateLimitStore::hit (atomic increment, time until reset)
//!     → admit, or 429 with Retry-After
//! ```
//!
//! # Design Decisions
//! - The store increments and reads in one atomic step, so concurrent
//!   requests on one key can never both take the last slot
//! - The memory store is only correct for a single instance; multi-instance
//!   deployments select the redis store in config
//! - Store failures fail closed

pub mod memory;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use thiserror::Error;

use crate::config::{RateCategory, RateLimitConfig, RatePreset, RatePresets, RouteRule, StoreKind};

pub use memory::MemoryStore;
pub use middleware::{rate_limit_middleware, ClientIdentity, IdentityResolver};
pub use store::{RateLimitStore, WindowHit};

/// Error type for rate-limit stores.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Store(String),

    #[error("rate limit store misconfigured: {0}")]
    Config(String),
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the window resets; set only on rejection.
    pub retry_after_secs: Option<u64>,
}

/// Rate-limit settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub enabled: bool,
    pub presets: RatePresets,
    pub routes: Vec<RouteRule>,
    pub trust_forwarded_for: bool,
}

impl RatePolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            presets: config.presets.clone(),
            routes: config.routes.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// First matching route rule wins; otherwise reads and writes are split
    /// by method.
    pub fn category_for(&self, method: &Method, path: &str) -> RateCategory {
        if let Some(rule) = self.routes.iter().find(|r| path.starts_with(&r.path_prefix)) {
            return rule.category;
        }
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            RateCategory::Read
        } else {
            RateCategory::Write
        }
    }
}

/// Applies presets on top of a counter store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Limiter over a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Build the store selected in configuration.
    pub async fn connect(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        match config.store {
            StoreKind::Memory => Ok(Self::in_memory()),
            #[cfg(feature = "redis")]
            StoreKind::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| RateLimitError::Config("redis_url is not set".into()))?;
                let store = redis_store::RedisStore::connect(url, &config.key_prefix).await?;
                Ok(Self::new(Arc::new(store)))
            }
            #[cfg(not(feature = "redis"))]
            StoreKind::Redis => Err(RateLimitError::Config(
                "built without the `redis` feature".into(),
            )),
        }
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count one request against `key` and decide whether to admit it.
    pub async fn check(
        &self,
        key: &str,
        preset: RatePreset,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let window = Duration::from_secs(preset.window_secs);
        let hit = self.store.hit(key, window).await?;

        if hit.count <= preset.max_requests {
            return Ok(RateLimitDecision {
                success: true,
                limit: preset.max_requests,
                remaining: preset.max_requests - hit.count,
                retry_after_secs: None,
            });
        }

        Ok(RateLimitDecision {
            success: false,
            limit: preset.max_requests,
            remaining: 0,
            retry_after_secs: Some(retry_after_secs(hit.resets_in, preset.window_secs)),
        })
    }
}

/// Whole seconds until reset, rounded up, within `1..=window_secs`.
fn retry_after_secs(resets_in: Duration, window_secs: u64) -> u64 {
    let secs = resets_in.as_secs() + u64::from(resets_in.subsec_nanos() > 0);
    secs.clamp(1, window_secs.max(1))
}
