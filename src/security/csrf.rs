//! CSRF gate.
//!
//! Double-submit cookie check run before any state-changing handler. The
//! gate resolves the request's token (reusing the cookie or minting a new
//! one), rejects state-changing requests whose header token does not match
//! the cookie, and sets the cookie on the way out when it was minted.

use std::fmt;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::{CsrfConfig, Environment};
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::classifier::RequestClassifier;
use crate::security::cookie::{attach_token, cookie_token, issue_or_reuse, CookieSettings};
use crate::security::state::GuardState;
use crate::security::token::{verify, CsrfFailure};

/// CSRF settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct CsrfPolicy {
    pub enabled: bool,
    pub classifier: RequestClassifier,
    pub cookie: CookieSettings,
    pub header_name: HeaderName,
}

impl CsrfPolicy {
    pub fn from_config(config: &CsrfConfig, environment: Environment) -> Self {
        let header_name = HeaderName::from_bytes(config.header_name.to_ascii_lowercase().as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static("x-csrf-token"));

        Self {
            enabled: config.enabled,
            classifier: RequestClassifier::new(config.exempt_paths.clone()),
            cookie: CookieSettings {
                name: config.cookie_name.clone(),
                max_age_secs: config.cookie_max_age_secs,
                secure: environment.is_production(),
            },
            header_name,
        }
    }
}

/// The token bound to the current request, available to handlers as a
/// request extension.
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CsrfToken(<redacted>)")
    }
}

/// Decide whether a request may proceed past the gate.
///
/// Reads headers only; never mutates anything.
pub fn enforce(
    policy: &CsrfPolicy,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
) -> Result<(), CsrfFailure> {
    if !policy.enabled || !policy.classifier.requires_csrf_check(method, path) {
        return Ok(());
    }

    let cookie = cookie_token(headers, &policy.cookie.name);
    let header = headers
        .get(&policy.header_name)
        .and_then(|v| v.to_str().ok());

    match verify(cookie.as_deref(), header) {
        Ok(()) => {
            tracing::debug!(endpoint = %path, method = %method, "CSRF validation passed");
            Ok(())
        }
        Err(failure) => {
            tracing::warn!(
                endpoint = %path,
                method = %method,
                has_cookie = cookie.as_deref().is_some_and(|c| !c.is_empty()),
                has_header = header.is_some_and(|h| !h.is_empty()),
                reason = failure.code(),
                "CSRF validation failed"
            );
            metrics::record_csrf_rejection(failure.code());
            Err(failure)
        }
    }
}

/// Middleware function for the CSRF gate.
pub async fn csrf_middleware(
    State(state): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let policy = state.policy.load_full();
    let csrf = &policy.csrf;
    let issued = issue_or_reuse(request.headers(), &csrf.cookie.name);

    let mut response = match enforce(csrf, request.method(), request.uri().path(), request.headers()) {
        Ok(()) => {
            request
                .extensions_mut()
                .insert(CsrfToken(issued.value.clone()));
            next.run(request).await
        }
        Err(failure) => ApiError::from(failure).into_response(),
    };

    if issued.fresh {
        attach_token(response.headers_mut(), &issued.value, &csrf.cookie);
        metrics::record_token_issued();
    }
    response
}
