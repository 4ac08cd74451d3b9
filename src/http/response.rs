//! Structured error responses.
//!
//! Every rejection produced by the gate is terminal for the request and is
//! rendered as a JSON body `{error, message}` with a machine-readable code.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::security::token::CsrfFailure;

/// Errors returned to clients before business logic runs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("CSRF token missing. Refresh the page and retry.")]
    CsrfMissing,

    #[error("CSRF token mismatch. Refresh the page and retry.")]
    CsrfMismatch,

    #[error("Too many requests. Wait {retry_after_secs} seconds and retry.")]
    RateLimited { retry_after_secs: u64 },

    #[error("Rate limiting is temporarily unavailable. Retry shortly.")]
    RateLimitUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CsrfMissing | ApiError::CsrfMismatch => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RateLimitUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::CsrfMissing => "CSRF_MISSING",
            ApiError::CsrfMismatch => "CSRF_MISMATCH",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::RateLimitUnavailable => "RATE_LIMIT_UNAVAILABLE",
        }
    }
}

impl From<CsrfFailure> for ApiError {
    fn from(failure: CsrfFailure) -> Self {
        match failure {
            CsrfFailure::Missing => ApiError::CsrfMissing,
            CsrfFailure::Mismatch => ApiError::CsrfMismatch,
        }
    }
}

/// Wire shape of an error body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = match self {
            ApiError::RateLimited { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            retry_after_seconds: retry_after,
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
