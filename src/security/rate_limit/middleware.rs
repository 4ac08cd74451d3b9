//! Rate limiting middleware.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::state::GuardState;

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Authenticated identity of the caller. Preferred over the client address
/// when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

/// Resolves the caller's identity before the limiter keys the request.
///
/// Installed with [`HttpServer::with_identity_resolver`](crate::HttpServer::with_identity_resolver).
/// A resolved identity is also inserted into the request extensions for the
/// handlers behind the gate.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, request: &Request<Body>) -> Option<ClientIdentity>;
}

impl<F> IdentityResolver for F
where
    F: Fn(&Request<Body>) -> Option<ClientIdentity> + Send + Sync,
{
    fn resolve(&self, request: &Request<Body>) -> Option<ClientIdentity> {
        self(request)
    }
}

/// Resolve the key component identifying the caller.
pub fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if let Some(identity) = request.extensions().get::<ClientIdentity>() {
        return format!("user:{}", identity.0);
    }

    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return format!("ip:{ip}");
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

/// Middleware function for per-client, per-category rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    metrics::record_request(request.method().as_str());

    if request.extensions().get::<ClientIdentity>().is_none() {
        if let Some(identity) = state.identity.as_ref().and_then(|r| r.resolve(&request)) {
            request.extensions_mut().insert(identity);
        }
    }

    let policy = state.policy.load_full();
    let rate = &policy.rate_limit;
    if !rate.enabled {
        return next.run(request).await;
    }

    let category = rate.category_for(request.method(), request.uri().path());
    let client = client_key(&request, rate.trust_forwarded_for);
    let key = format!("{}:{}", client, category.as_str());
    let preset = rate.presets.get(category);

    match state.limiter.check(&key, preset).await {
        Ok(decision) if decision.success => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
            headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
            response
        }
        Ok(decision) => {
            let retry_after_secs = decision.retry_after_secs.unwrap_or(preset.window_secs);
            tracing::warn!(
                client = %client,
                category = category.as_str(),
                endpoint = %request.uri().path(),
                retry_after_secs,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(category.as_str());
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                store = state.limiter.store().store_type(),
                "Rate limit store failed"
            );
            ApiError::RateLimitUnavailable.into_response()
        }
    }
}
