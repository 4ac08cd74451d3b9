//! Security subsystem: the request gate.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit (per-client, per-category budget)
//!     → csrf (classifier → cookie vs header token)
//!     → business handlers
//! ```
//!
//! # Design Decisions
//! - Defense in depth: both gates run before any handler
//! - Fail closed: reject on any security check failure
//! - No trust in client input; token values never reach the logs

pub mod classifier;
pub mod cookie;
pub mod csrf;
pub mod rate_limit;
pub mod state;
pub mod token;

pub use classifier::RequestClassifier;
pub use csrf::{csrf_middleware, enforce, CsrfPolicy, CsrfToken};
pub use rate_limit::{
    rate_limit_middleware, ClientIdentity, IdentityResolver, RateLimitDecision, RateLimiter,
};
pub use state::{GuardPolicy, GuardState};
pub use token::{generate_token, validate, verify, CsrfFailure};
