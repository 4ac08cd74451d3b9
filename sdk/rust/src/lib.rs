//! Client for the school portal API.
//!
//! Fetches and caches the CSRF token, attaches it to state-changing
//! requests, and shares freshly fetched tokens with sibling clients over a
//! [`TokenChannel`].

pub mod channel;
pub mod client;
pub mod error;
pub mod token_cache;

pub use channel::{ChannelMessage, TokenChannel, CHANNEL_NAME};
pub use client::{PortalClient, CSRF_HEADER};
pub use error::ClientError;
pub use token_cache::{HttpTokenSource, TokenCache, TokenCacheConfig, TokenSource};
