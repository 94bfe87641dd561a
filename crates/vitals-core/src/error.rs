//! Error types for `vitals-core`.
//!
//! Token, session and store failures are kept as separate enums because
//! callers handle them under different policies: token and session errors
//! end the request, while store errors are absorbed by the rate limiter.

/// Why a presented token failed cryptographic or expiry checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token could not be decoded into the expected structure.
    #[error("malformed token")]
    Malformed,

    /// The signature does not match the payload under the server secret.
    #[error("token signature invalid")]
    SignatureInvalid,

    /// The expiry instant has passed.
    #[error("token expired")]
    Expired,

    /// Encoding a new token failed. Only produced by issuance.
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Why a cryptographically valid token is not an acceptable session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The identity no longer exists in the credential store.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// The identity exists but has been deactivated.
    #[error("identity inactive: {0}")]
    IdentityInactive(String),

    /// A newer login advanced the session marker past the token's issuance.
    #[error("session superseded by a newer login")]
    Superseded,

    /// The credential store failed or did not answer in time.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure talking to a backing store (credentials or counters).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out")]
    Timeout,
}

pub type TokenResult<T> = Result<T, TokenError>;
pub type SessionResult<T> = Result<T, SessionError>;
pub type StoreResult<T> = Result<T, StoreError>;
