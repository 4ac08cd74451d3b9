//! Runtime policy shared by the gate middlewares.
//!
//! The policy is derived from [`GuardConfig`] and swapped atomically on
//! config reload. The rate-limit store is not part of it: counters survive
//! a reload.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::GuardConfig;
use crate::security::csrf::CsrfPolicy;
use crate::security::rate_limit::{IdentityResolver, RateLimiter, RatePolicy};

/// Everything the gate consults per request.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub csrf: CsrfPolicy,
    pub rate_limit: RatePolicy,
}

impl GuardPolicy {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            csrf: CsrfPolicy::from_config(&config.csrf, config.environment),
            rate_limit: RatePolicy::from_config(&config.rate_limit),
        }
    }
}

/// State injected into the gate middlewares and handlers.
#[derive(Clone)]
pub struct GuardState {
    pub policy: Arc<ArcSwap<GuardPolicy>>,
    pub limiter: Arc<RateLimiter>,
    pub identity: Option<Arc<dyn IdentityResolver>>,
}

impl GuardState {
    pub fn new(policy: GuardPolicy, limiter: RateLimiter) -> Self {
        Self {
            policy: Arc::new(ArcSwap::from_pointee(policy)),
            limiter: Arc::new(limiter),
            identity: None,
        }
    }

    /// Key rate limits by the identity `resolver` returns, when it returns one.
    pub fn with_identity(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    /// Replace the policy for all subsequent requests.
    pub fn reload(&self, config: &GuardConfig) {
        self.policy.store(Arc::new(GuardPolicy::from_config(config)));
        tracing::info!(
            exempt_paths = config.csrf.exempt_paths.len(),
            route_rules = config.rate_limit.routes.len(),
            "Guard policy reloaded"
        );
    }
}
