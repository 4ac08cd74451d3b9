//! Same-process publish/subscribe channel for CSRF tokens.
//!
//! Plays the role a same-origin broadcast channel plays between browser
//! tabs: every [`TokenCache`](crate::TokenCache) attached to one channel sees
//! the tokens the others fetch. Tabs of one origin also share one cookie
//! jar, so the channel owns the cookie-enabled HTTP client its clients use.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ClientError;

/// Name the channel is known by in logs.
pub const CHANNEL_NAME: &str = "csrf-token-sync";

const DEFAULT_CAPACITY: usize = 16;

/// Message carried on the channel: `{"type": "csrf-token", "token": "..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    CsrfToken {
        token: String,
        /// Sender, so a cache can skip its own broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<Uuid>,
    },
}

impl std::fmt::Debug for ChannelMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelMessage::CsrfToken { origin, .. } => f
                .debug_struct("CsrfToken")
                .field("token", &"<redacted>")
                .field("origin", origin)
                .finish(),
        }
    }
}

/// Cloneable handle to a shared token channel.
#[derive(Clone)]
pub struct TokenChannel {
    tx: broadcast::Sender<ChannelMessage>,
    http: Arc<OnceLock<reqwest::Client>>,
}

impl TokenChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            http: Arc::new(OnceLock::new()),
        }
    }

    /// The cookie-enabled client shared by everything on this channel.
    ///
    /// Built on first use. A token is only accepted alongside the cookie it
    /// was issued with, so clients that adopt each other's tokens must send
    /// the same cookie.
    pub fn http_client(&self) -> Result<reqwest::Client, ClientError> {
        if let Some(client) = self.http.get() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(self.http.get_or_init(|| client).clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }

    /// Publish a token; returns how many subscribers received it.
    pub fn publish(&self, token: &str, origin: Uuid) -> usize {
        self.tx
            .send(ChannelMessage::CsrfToken {
                token: token.to_string(),
                origin: Some(origin),
            })
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TokenChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = ChannelMessage::CsrfToken {
            token: "abc".into(),
            origin: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"type": "csrf-token", "token": "abc"})
        );

        let parsed: ChannelMessage =
            serde_json::from_str(r#"{"type":"csrf-token","token":"xyz"}"#).unwrap();
        assert_eq!(
            parsed,
            ChannelMessage::CsrfToken {
                token: "xyz".into(),
                origin: None
            }
        );
    }

    #[test]
    fn test_clones_share_one_http_client() {
        let channel = TokenChannel::new();
        let sibling = channel.clone();

        channel.http_client().unwrap();
        assert!(sibling.http.get().is_some());
        assert!(Arc::ptr_eq(&channel.http, &sibling.http));

        let other = TokenChannel::new();
        assert!(other.http.get().is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let channel = TokenChannel::new();
        assert_eq!(channel.publish("abc", Uuid::new_v4()), 0);

        let _rx = channel.subscribe();
        assert_eq!(channel.publish("abc", Uuid::new_v4()), 1);
    }
}
