//! Cookie binding for CSRF tokens.
//!
//! The cookie is the only place a token lives on the server side, which keeps
//! every request independent of the others.

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::security::token::{generate_token, is_well_formed};

/// Cookie attributes applied when a token is attached to a response.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub max_age_secs: u64,
    pub secure: bool,
}

/// Token resolved for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    /// True when minted for this request and not yet in the client's cookie.
    pub fresh: bool,
}

/// Read the raw cookie token, well-formed or not.
pub fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
}

/// Reuse a well-formed cookie token, or mint a new one.
pub fn issue_or_reuse(headers: &HeaderMap, cookie_name: &str) -> IssuedToken {
    match cookie_token(headers, cookie_name) {
        Some(value) if is_well_formed(&value) => IssuedToken { value, fresh: false },
        _ => IssuedToken {
            value: generate_token(),
            fresh: true,
        },
    }
}

/// Render the `Set-Cookie` value for `token`.
pub fn build_cookie(token: &str, settings: &CookieSettings) -> Cookie<'static> {
    let max_age = i64::try_from(settings.max_age_secs).unwrap_or(i64::MAX);

    Cookie::build((settings.name.clone(), token.to_string()))
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.secure)
        .build()
}

/// Append the token cookie to outgoing response headers.
pub fn attach_token(headers: &mut HeaderMap, token: &str, settings: &CookieSettings) {
    let cookie = build_cookie(token, settings);
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(_) => {
            tracing::error!(cookie = %settings.name, "Token cookie is not a valid header value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn settings(secure: bool) -> CookieSettings {
        CookieSettings {
            name: "csrf-token".into(),
            max_age_secs: 86_400,
            secure,
        }
    }

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_mints_when_cookie_absent() {
        let issued = issue_or_reuse(&HeaderMap::new(), "csrf-token");
        assert!(issued.fresh);
        assert!(is_well_formed(&issued.value));
    }

    #[test]
    fn test_reuses_well_formed_cookie() {
        let existing = generate_token();
        let headers = headers_with_cookie(&format!("session=xyz; csrf-token={existing}"));

        let issued = issue_or_reuse(&headers, "csrf-token");
        assert_eq!(issued, IssuedToken { value: existing, fresh: false });
    }

    #[test]
    fn test_replaces_malformed_cookie() {
        let headers = headers_with_cookie("csrf-token=abc123");

        let issued = issue_or_reuse(&headers, "csrf-token");
        assert!(issued.fresh);
        assert_ne!(issued.value, "abc123");
        // The raw value is still visible to the validator.
        assert_eq!(cookie_token(&headers, "csrf-token").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_cookie_attributes() {
        let mut headers = HeaderMap::new();
        attach_token(&mut headers, "deadbeef", &settings(true));

        let value = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(value.starts_with("csrf-token=deadbeef"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=86400"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Secure"));
    }

    #[test]
    fn test_development_cookie_is_not_secure() {
        let mut headers = HeaderMap::new();
        attach_token(&mut headers, "deadbeef", &settings(false));

        let value = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(!value.contains("Secure"));
    }
}
