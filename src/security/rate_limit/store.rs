//! Counter storage behind the rate limiter.

use std::time::Duration;

use async_trait::async_trait;

use super::RateLimitError;

/// State of a key's window right after counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

/// Trait for rate-limit counter backends.
///
/// `hit` must increment and read in one atomic step with respect to other
/// callers using the same key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`, starting a new window of length
    /// `window` when none is active.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError>;

    /// Forget any state for `key`.
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;

    /// Evict expired windows, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, RateLimitError> {
        Ok(0)
    }

    /// Store type name for logging.
    fn store_type(&self) -> &'static str;
}
