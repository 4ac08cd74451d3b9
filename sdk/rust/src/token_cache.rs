//! Client-side CSRF token cache.
//!
//! Holds one token with a TTL shorter than the server cookie, coalesces
//! concurrent refreshes into a single fetch, and keeps every cache attached
//! to the same [`TokenChannel`] in sync.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::channel::{ChannelMessage, TokenChannel, CHANNEL_NAME};
use crate::error::ClientError;

/// Where tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String, ClientError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches tokens from the gate's `GET /api/csrf-token` endpoint.
///
/// The `reqwest::Client` must have its cookie store enabled and must be the
/// same client used for subsequent requests, so the cookie set alongside the
/// token is sent back.
pub struct HttpTokenSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/api/csrf-token", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<String, ClientError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        if parsed.token.is_empty() {
            return Err(ClientError::Decode("empty token".into()));
        }
        Ok(parsed.token)
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct TokenCacheConfig {
    /// How long a token is served from memory. Must stay below the server's
    /// cookie lifetime.
    pub ttl: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Clone)]
struct InFlight {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
}

#[derive(Default)]
struct CacheState {
    cached: Option<CachedToken>,
    in_flight: Option<InFlight>,
}

impl CacheState {
    fn fresh_token(&self, now: Instant) -> Option<String> {
        self.cached
            .as_ref()
            .filter(|c| c.expires_at > now)
            .map(|c| c.token.clone())
    }
}

/// Coalescing CSRF token cache.
pub struct TokenCache {
    id: Uuid,
    source: Arc<dyn TokenSource>,
    channel: TokenChannel,
    config: TokenCacheConfig,
    state: Mutex<CacheState>,
    next_fetch_id: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TokenCache {
    /// Create a cache attached to `channel`.
    ///
    /// Must be called within a Tokio runtime: the cache starts listening for
    /// tokens published by its siblings immediately.
    pub fn new(
        source: Arc<dyn TokenSource>,
        channel: TokenChannel,
        config: TokenCacheConfig,
    ) -> Arc<Self> {
        let mut rx = channel.subscribe();
        let cache = Arc::new(Self {
            id: Uuid::new_v4(),
            source,
            channel,
            config,
            state: Mutex::new(CacheState::default()),
            next_fetch_id: AtomicU64::new(0),
            listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&cache);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => match weak.upgrade() {
                        Some(cache) => cache.adopt(message),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(channel = CHANNEL_NAME, skipped, "Token channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *cache.lock_listener() = Some(handle);

        cache
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The cached token if still fresh. Never performs I/O.
    pub fn cached(&self) -> Option<String> {
        self.lock_state().fresh_token(Instant::now())
    }

    /// Drop the cached token so the next call fetches a new one.
    pub fn invalidate(&self) {
        self.lock_state().cached = None;
    }

    /// Return the cached token, or join or start a fetch.
    ///
    /// Concurrent callers share one in-flight fetch. Returns `None` when the
    /// fetch fails or times out; the server will then reject the request
    /// with `CSRF_MISSING`.
    pub async fn get_cached_or_fetch(self: &Arc<Self>) -> Option<String> {
        let fetch = {
            let mut state = self.lock_state();
            if let Some(token) = state.fresh_token(Instant::now()) {
                return Some(token);
            }
            match &state.in_flight {
                Some(in_flight) => in_flight.fetch.clone(),
                None => {
                    let in_flight = self.start_fetch();
                    let fetch = in_flight.fetch.clone();
                    state.in_flight = Some(in_flight);
                    fetch
                }
            }
        };

        // An aborted fetch resolves to None; a sibling's token may have
        // been adopted in the meantime.
        match fetch.await {
            Some(token) => Some(token),
            None => self.cached(),
        }
    }

    fn start_fetch(self: &Arc<Self>) -> InFlight {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let source = self.source.clone();
        let timeout = self.config.fetch_timeout;

        let (abort, registration) = AbortHandle::new_pair();
        let request = Abortable::new(
            async move {
                tokio::time::timeout(timeout, source.fetch_token())
                    .await
                    .unwrap_or(Err(ClientError::FetchTimeout))
            },
            registration,
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let fetch = async move {
            let token = match request.await {
                Ok(Ok(token)) => Some(token),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, code = e.code(), "CSRF token fetch failed");
                    None
                }
                Err(_aborted) => {
                    tracing::debug!("CSRF token fetch cancelled by broadcast");
                    None
                }
            };
            if let Some(cache) = weak.upgrade() {
                cache.complete_fetch(id, token.as_deref());
            }
            token
        }
        .boxed()
        .shared();

        InFlight { id, fetch, abort }
    }

    fn complete_fetch(&self, id: u64, token: Option<&str>) {
        {
            let mut state = self.lock_state();
            if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
                state.in_flight = None;
            }
            if let Some(token) = token {
                state.cached = Some(CachedToken {
                    token: token.to_string(),
                    expires_at: Instant::now() + self.config.ttl,
                });
            }
        }

        if let Some(token) = token {
            let receivers = self.channel.publish(token, self.id);
            tracing::debug!(channel = CHANNEL_NAME, receivers, "Broadcast fresh CSRF token");
        }
    }

    /// Take a token published by a sibling and cancel our own fetch.
    fn adopt(&self, message: ChannelMessage) {
        let ChannelMessage::CsrfToken { token, origin } = message;
        if origin == Some(self.id) || token.is_empty() {
            return;
        }

        let cancelled = {
            let mut state = self.lock_state();
            state.cached = Some(CachedToken {
                token,
                expires_at: Instant::now() + self.config.ttl,
            });
            state.in_flight.take()
        };

        if let Some(in_flight) = cancelled {
            in_flight.abort.abort();
        }
        tracing::debug!(channel = CHANNEL_NAME, "Adopted CSRF token from sibling");
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // The state is plain data and stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TokenCache {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }
}
