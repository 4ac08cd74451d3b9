//! CSRF token generation and validation.
//!
//! Tokens are 32 bytes from the operating system CSPRNG, hex-encoded. They are
//! opaque: the server only ever compares them, never decodes them.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Number of random bytes in a token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded token.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Why a double-submit check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// The cookie or the header token is absent or empty.
    Missing,
    /// Both are present but differ.
    Mismatch,
}

impl CsrfFailure {
    /// Machine-readable code sent to clients.
    pub fn code(self) -> &'static str {
        match self {
            CsrfFailure::Missing => "CSRF_MISSING",
            CsrfFailure::Mismatch => "CSRF_MISMATCH",
        }
    }
}

/// Mint a fresh token.
///
/// Panics only if the OS random source is unavailable, which is a platform
/// fault the process cannot recover from.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `value` has the shape of a token this server issues.
pub fn is_well_formed(value: &str) -> bool {
    value.len() == TOKEN_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare a cookie-held token with a client-submitted one.
///
/// Empty inputs never validate. The length check runs before the
/// constant-time comparison and so leaks only the length, which is fixed for
/// issued tokens.
pub fn validate(cookie_token: &str, submitted_token: &str) -> bool {
    if cookie_token.is_empty() || submitted_token.is_empty() {
        return false;
    }
    if cookie_token.len() != submitted_token.len() {
        return false;
    }
    cookie_token
        .as_bytes()
        .ct_eq(submitted_token.as_bytes())
        .into()
}

/// Run the double-submit check, classifying the failure.
pub fn verify(cookie_token: Option<&str>, header_token: Option<&str>) -> Result<(), CsrfFailure> {
    let (cookie, header) = match (cookie_token, header_token) {
        (Some(c), Some(h)) if !c.is_empty() && !h.is_empty() => (c, h),
        _ => return Err(CsrfFailure::Missing),
    };

    if validate(cookie, header) {
        Ok(())
    } else {
        Err(CsrfFailure::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_hex_and_unique() {
        let a = generate_token();
        let b = generate_token();

        assert_eq!(a.len(), TOKEN_LEN);
        assert!(is_well_formed(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed(&"ab".repeat(32)));
        assert!(!is_well_formed("abc123"));
        assert!(!is_well_formed(&"zz".repeat(32)));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn test_identical_tokens_validate() {
        let token = generate_token();
        assert!(validate(&token, &token.clone()));
    }

    #[test]
    fn test_any_single_byte_difference_fails() {
        let token = generate_token();
        for i in 0..token.len() {
            let mut other = token.clone().into_bytes();
            other[i] = if other[i] == b'0' { b'1' } else { b'0' };
            let other = String::from_utf8(other).unwrap();
            assert!(!validate(&token, &other), "difference at {i} accepted");
        }
    }

    #[test]
    fn test_length_difference_fails() {
        let token = generate_token();
        assert!(!validate(&token, &token[..TOKEN_LEN - 1]));
        assert!(!validate(&token[..1], &token));
    }

    #[test]
    fn test_empty_tokens_never_validate() {
        assert!(!validate("", ""));
        assert!(!validate("", "abc"));
        assert!(!validate("abc", ""));
    }

    #[test]
    fn test_verify_classifies_failures() {
        assert_eq!(verify(None, None), Err(CsrfFailure::Missing));
        assert_eq!(verify(Some("abc123"), None), Err(CsrfFailure::Missing));
        assert_eq!(verify(None, Some("abc123")), Err(CsrfFailure::Missing));
        assert_eq!(verify(Some(""), Some("")), Err(CsrfFailure::Missing));
        assert_eq!(verify(Some("abc123"), Some("abc124")), Err(CsrfFailure::Mismatch));
        assert_eq!(verify(Some("abc123"), Some("abc123")), Ok(()));
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(CsrfFailure::Missing.code(), "CSRF_MISSING");
        assert_eq!(CsrfFailure::Mismatch.code(), "CSRF_MISMATCH");
    }
}
