//! Decides which requests go through the CSRF check.

use axum::http::Method;

/// Classifies requests as state-changing or read-only.
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    exempt_paths: Vec<String>,
}

impl RequestClassifier {
    pub fn new(exempt_paths: Vec<String>) -> Self {
        Self { exempt_paths }
    }

    /// True for state-changing methods on non-exempt paths.
    pub fn requires_csrf_check(&self, method: &Method, path: &str) -> bool {
        let state_changing = matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        state_changing && !self.is_exempt(path)
    }

    /// An exempt entry covers itself and everything below it.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| {
            let exempt = exempt.trim_end_matches('/');
            path == exempt
                || path
                    .strip_prefix(exempt)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
