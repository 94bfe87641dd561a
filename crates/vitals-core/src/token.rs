//! Signed session tokens (HS256 JWT).
//!
//! The issuer binds an identity to an issuance instant. It knows nothing
//! about session markers: a token that verifies here may still be rejected
//! by [`SessionGuard`](crate::session::SessionGuard).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{TokenError, TokenResult};

/// JWT payload.
///
/// `iat` stays in whole seconds for interoperability; `iat_ms` carries the
/// precision the session marker comparison needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub iat_ms: i64,
    pub exp: i64,
    pub jti: String,
}

/// A freshly minted token and the instants it was stamped with.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The facts a verified token asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub identity: String,
    pub issued_at: DateTime<Utc>,
    pub jti: String,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `verify`.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mints a token stamped with the current instant.
    pub fn issue(&self, identity: &str) -> TokenResult<IssuedToken> {
        self.issue_at(identity, self.clock.now())
    }

    /// Mints a token stamped with `issued_at`.
    ///
    /// Login passes the session marker it just wrote so the new token and
    /// the marker compare equal.
    pub fn issue_at(&self, identity: &str, issued_at: DateTime<Utc>) -> TokenResult<IssuedToken> {
        let expires_at = issued_at + self.ttl;
        let claims = Claims {
            sub: identity.to_string(),
            iat: issued_at.timestamp(),
            iat_ms: issued_at.timestamp_millis(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        tracing::debug!(identity, jti = %claims.jti, "token issued");

        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Checks signature integrity and expiry.
    pub fn verify(&self, raw: &str) -> TokenResult<VerifiedToken> {
        let data = decode::<Claims>(raw, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                _ => TokenError::Malformed,
            }
        })?;
        let claims = data.claims;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let issued_at =
            DateTime::from_timestamp_millis(claims.iat_ms).ok_or(TokenError::Malformed)?;

        Ok(VerifiedToken {
            identity: claims.sub,
            issued_at,
            jti: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer_at(secs: i64) -> (TokenIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(secs));
        let issuer = TokenIssuer::new(SECRET, Duration::hours(1), clock.clone());
        (issuer, clock)
    }

    #[test]
    fn issued_token_verifies_with_identity_and_instant() {
        let (issuer, _clock) = issuer_at(1_000);
        let issued = issuer.issue("user-1").unwrap();

        assert_eq!(issued.issued_at.timestamp(), 1_000);
        assert_eq!(issued.expires_at.timestamp(), 4_600);

        let verified = issuer.verify(&issued.token).unwrap();
        assert_eq!(verified.identity, "user-1");
        assert_eq!(verified.issued_at, issued.issued_at);
    }

    #[test]
    fn issue_at_keeps_millisecond_precision() {
        let (issuer, _clock) = issuer_at(1_000);
        let instant = DateTime::from_timestamp_millis(2_000_123).unwrap();
        let issued = issuer.issue_at("user-1", instant).unwrap();

        let verified = issuer.verify(&issued.token).unwrap();
        assert_eq!(verified.issued_at.timestamp_millis(), 2_000_123);
    }

    #[test]
    fn each_token_gets_a_distinct_jti() {
        let (issuer, _clock) = issuer_at(1_000);
        let a = issuer.verify(&issuer.issue("u").unwrap().token).unwrap();
        let b = issuer.verify(&issuer.issue("u").unwrap().token).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_signature_invalid() {
        let (issuer, clock) = issuer_at(1_000);
        let other = TokenIssuer::new(b"another-secret-another-secret-xx", Duration::hours(1), clock);
        let issued = other.issue("user-1").unwrap();

        assert_eq!(
            issuer.verify(&issued.token).unwrap_err(),
            TokenError::SignatureInvalid
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let (issuer, _clock) = issuer_at(1_000);
        assert_eq!(issuer.verify("not-a-jwt").unwrap_err(), TokenError::Malformed);
        assert_eq!(issuer.verify("").unwrap_err(), TokenError::Malformed);
        assert_eq!(issuer.verify("a.b.c").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn token_expires_at_expiry_instant() {
        let (issuer, clock) = issuer_at(1_000);
        let issued = issuer.issue("user-1").unwrap();

        clock.advance(Duration::seconds(3_599));
        assert!(issuer.verify(&issued.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(issuer.verify(&issued.token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn expiry_is_checked_without_leeway() {
        let (issuer, clock) = issuer_at(1_000);
        let issued = issuer.issue("user-1").unwrap();
        clock.advance(Duration::hours(1) + Duration::seconds(30));
        assert_eq!(issuer.verify(&issued.token).unwrap_err(), TokenError::Expired);
    }
}
