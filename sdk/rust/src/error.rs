use thiserror::Error;

/// Errors surfaced by the portal client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("CSRF token fetch timed out")]
    FetchTimeout,

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Machine-readable code, matching the server's error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Http(_) => "HTTP_ERROR",
            ClientError::Status { .. } => "HTTP_STATUS",
            ClientError::RateLimited { .. } => "RATE_LIMITED",
            ClientError::FetchTimeout => "FETCH_TIMEOUT",
            ClientError::Decode(_) => "DECODE_ERROR",
        }
    }
}
