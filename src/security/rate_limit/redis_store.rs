//! Redis rate-limit store.
//!
//! Shares counters across instances. The increment and the expiry read run
//! in one Lua script, so concurrent instances observe a single sequence of
//! counts per key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::store::{RateLimitStore, WindowHit};
use super::RateLimitError;

const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis-backed counter store.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisStore {
    /// Connect to `url`, namespacing keys under `prefix`.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(store_error)?;

        tracing::info!(prefix = %prefix, "Connected to Redis rate-limit store");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            script: Script::new(HIT_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn store_error(e: redis::RedisError) -> RateLimitError {
    RateLimitError::Store(e.to_string())
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let mut conn = self.conn.clone();
        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(self.key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(WindowHit {
            count,
            resets_in: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    // Tests marked ignored need a running Redis instance.
    // Run with: cargo test --features redis -- --ignored

    use super::*;
    use crate::config::RatePreset;
    use crate::security::rate_limit::RateLimiter;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    fn unique_key(name: &str) -> String {
        format!("{name}:{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisStore::connect("not a redis url", "ratelimit").await;
        assert!(matches!(result, Err(RateLimitError::Store(_))));
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_fixed_window() {
        let store = RedisStore::connect(&redis_url(), "portal-guard-test").await.unwrap();
        let key = unique_key("ip:10.0.0.1:write");
        let window = Duration::from_secs(60);

        for expected in 1..=3u64 {
            let hit = store.hit(&key, window).await.unwrap();
            assert_eq!(hit.count, expected);
            assert!(hit.resets_in <= window);
        }

        let over = store.hit(&key, window).await.unwrap();
        assert_eq!(over.count, 4);
        assert!(over.resets_in > Duration::ZERO && over.resets_in <= window);

        store.reset(&key).await.unwrap();
        assert_eq!(store.hit(&key, window).await.unwrap().count, 1);
        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_limiter_rejects_over_budget() {
        let store = RedisStore::connect(&redis_url(), "portal-guard-test").await.unwrap();
        let limiter = RateLimiter::new(std::sync::Arc::new(store));
        let key = unique_key("user:staff-3:auth");
        let preset = RatePreset::new(3, 60);

        for remaining in (0..3).rev() {
            let decision = limiter.check(&key, preset).await.unwrap();
            assert!(decision.success);
            assert_eq!(decision.remaining, remaining);
        }

        let decision = limiter.check(&key, preset).await.unwrap();
        assert!(!decision.success);
        let retry = decision.retry_after_secs.unwrap();
        assert!(retry > 0 && retry <= 60);

        limiter.store().reset(&key).await.unwrap();
        assert!(limiter.check(&key, preset).await.unwrap().success);
        limiter.store().reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_window_expires() {
        let store = RedisStore::connect(&redis_url(), "portal-guard-test").await.unwrap();
        let key = unique_key("ip:10.0.0.2:read");
        let window = Duration::from_millis(200);

        store.hit(&key, window).await.unwrap();
        store.hit(&key, window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let hit = store.hit(&key, window).await.unwrap();
        assert_eq!(hit.count, 1);
        store.reset(&key).await.unwrap();
    }
}
