//! Vitals core library: session validity and request rate limiting.
//!
//! `vitals-core` holds the pieces of the mobile backend that carry real
//! invariants and are independent of the HTTP layer.
//!
//! # Modules
//!
//! - [`clock`] — Injectable time source ([`Clock`], [`SystemClock`]).
//! - [`token`] — Signed session tokens ([`TokenIssuer`]).
//! - [`session`] — Single-active-session enforcement via a per-identity
//!   session marker ([`SessionGuard`], [`CredentialStore`]).
//! - [`rate_limit`] — Fixed-window limiter over pluggable counter stores
//!   ([`RateLimiter`], [`CounterStore`]).
//! - [`error`] — Error types for tokens, sessions and stores.

pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod session;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use error::{SessionError, SessionResult, StoreError, StoreResult, TokenError, TokenResult};
pub use rate_limit::{
    CounterStore, Decision, LimitRule, MemoryCounterStore, RateLimitKey, RateLimiter,
    RedisCounterStore, RouteClass, WindowHit,
};
pub use session::{CredentialRecord, CredentialStore, MemoryCredentialStore, SessionGuard};
pub use token::{Claims, IssuedToken, TokenIssuer, VerifiedToken};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::ManualClock;
