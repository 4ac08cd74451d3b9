//! Endpoints owned by the gate itself.

use axum::{
    http::header::CACHE_CONTROL,
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;

use crate::security::CsrfToken;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /api/csrf-token`: return the token bound to this request.
///
/// The CSRF middleware has already reused the cookie token or minted a new
/// one and will set the cookie on the response when needed.
pub async fn csrf_token(Extension(token): Extension<CsrfToken>) -> impl IntoResponse {
    (
        [(CACHE_CONTROL, "no-store")],
        Json(TokenResponse { token: token.0 }),
    )
}

/// `GET /health`
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
