//! In-memory rate-limit store.
//!
//! Uses `DashMap` so that the increment for a key happens under that key's
//! shard lock. Counters are local to the process.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::{RateLimitStore, WindowHit};
use super::RateLimitError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    window_start: Instant,
    window: Duration,
}

impl WindowState {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, expired or not.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState {
                count: 0,
                window_start: now,
                window,
            });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.window_start = now;
            entry.window = window;
        }
        entry.count = entry.count.saturating_add(1);

        let elapsed = now.duration_since(entry.window_start);
        Ok(WindowHit {
            count: entry.count,
            resets_in: entry.window.saturating_sub(elapsed),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.windows.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, RateLimitError> {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_expired(now));
        let after = self.windows.len();

        metrics::record_rate_limit_keys(after);
        Ok(before.saturating_sub(after))
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
