use std::sync::Arc;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::channel::TokenChannel;
use crate::error::ClientError;
use crate::token_cache::{HttpTokenSource, TokenCache, TokenCacheConfig};

/// Header the gate reads the submitted token from.
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the portal API.
///
/// Keeps the CSRF cookie in its cookie store and attaches the cached token
/// to every state-changing request.
pub struct PortalClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl PortalClient {
    /// Client with its own token channel.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_channel(base_url, TokenChannel::new(), TokenCacheConfig::default())
    }

    /// Client whose token cache is kept in sync with every other cache on
    /// `channel`. All clients on one channel share the channel's cookie jar.
    /// Must be called within a Tokio runtime.
    pub fn with_channel(
        base_url: &str,
        channel: TokenChannel,
        config: TokenCacheConfig,
    ) -> Result<Self, ClientError> {
        let client = channel.http_client()?;
        Ok(Self::with_http_client(client, base_url, channel, config))
    }

    /// Client over an existing `reqwest::Client`, which must have its
    /// cookie store enabled and must be shared by every client on `channel`,
    /// as the cookie jar is shared by browser tabs of one origin.
    pub fn with_http_client(
        client: Client,
        base_url: &str,
        channel: TokenChannel,
        config: TokenCacheConfig,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let source = Arc::new(HttpTokenSource::new(client.clone(), &base_url));

        Self {
            tokens: TokenCache::new(source, channel, config),
            client,
            base_url,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Send a request, attaching the CSRF header on mutating methods.
    ///
    /// A `CSRF_*` rejection drops the cached token and retries once with a
    /// fresh one. A 429 becomes [`ClientError::RateLimited`]; other error
    /// statuses become [`ClientError::Status`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        let resp = self.send_once(method.clone(), path, body).await?;
        if resp.status() != StatusCode::FORBIDDEN || !is_mutating(&method) {
            return check_status(resp).await;
        }

        let text = resp.text().await.unwrap_or_default();
        let csrf_rejection = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error.starts_with("CSRF_"))
            .unwrap_or(false);
        if !csrf_rejection {
            return Err(ClientError::Status {
                status: StatusCode::FORBIDDEN.as_u16(),
                body: text,
            });
        }

        tracing::debug!(path, "CSRF token rejected, refreshing and retrying");
        self.tokens.invalidate();
        let resp = self.send_once(method, path, body).await?;
        check_status(resp).await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        let mutating = is_mutating(&method);
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));

        if mutating {
            match self.tokens.get_cached_or_fetch().await {
                Some(token) => req = req.header(CSRF_HEADER, token),
                None => tracing::warn!(path, "Sending request without CSRF token"),
            }
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        Ok(req.send().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        decode(self.send(Method::GET, path, None).await?).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ClientError> {
        decode(self.send(Method::POST, path, Some(body)).await?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        return Err(ClientError::RateLimited { retry_after_secs });
    }

    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
}
