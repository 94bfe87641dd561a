//! Request admission for the authenticated route group.
//!
//! Order: bearer token → signature and expiry → session marker → per-identity
//! rate limit → forward with [`AuthUser`] attached. A request that fails
//! authentication is still counted against its client IP, so a flood of bad
//! tokens is throttled like any anonymous traffic.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use vitals_core::{RateLimitKey, RouteClass, SessionError};

use crate::error::AppError;
use crate::middleware::rate_limit::{apply_rate_limit_headers, request_ip};
use crate::state::AppState;

/// The identity admitted by [`admit`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub issued_at: DateTime<Utc>,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::CredentialMissing)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers).ok_or_else(|| {
        tracing::debug!("Missing bearer token");
        AppError::CredentialMissing
    })?;

    let verified = state.tokens.verify(token).map_err(|e| {
        tracing::warn!(reason = %e, "Rejected bearer token");
        AppError::InvalidCredential
    })?;

    state
        .sessions
        .validate(&verified.identity, verified.issued_at)
        .await
        .map_err(|e| match e {
            SessionError::Superseded => {
                tracing::info!(identity = %verified.identity, "Session superseded by a newer login");
                AppError::SessionSuperseded
            }
            SessionError::IdentityNotFound(_) | SessionError::IdentityInactive(_) => {
                tracing::warn!(identity = %verified.identity, reason = %e, "Rejected token for unusable identity");
                AppError::InvalidCredential
            }
            SessionError::Store(store_err) => {
                tracing::error!(identity = %verified.identity, error = %store_err, "Credential store failed during admission");
                AppError::InvalidCredential
            }
        })?;

    Ok(AuthUser {
        id: verified.identity,
        issued_at: verified.issued_at,
    })
}

pub async fn admit(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let authenticated = authenticate(&state, req.headers()).await;
    let limits = &state.config.rate_limit;

    match authenticated {
        Ok(user) => {
            let key = RateLimitKey::identity(RouteClass::Api, &user.id);
            let decision = state
                .limiter
                .check_and_increment(&key, limits.authenticated.rule())
                .await;
            if !decision.allowed {
                return AppError::RateLimited(decision).into_response();
            }

            req.extensions_mut().insert(user);
            let mut response = next.run(req).await;
            apply_rate_limit_headers(&mut response, &decision);
            response
        }
        Err(rejection) => {
            let key = RateLimitKey::ip(RouteClass::Api, request_ip(&req, &limits.trusted_proxies));
            let decision = state
                .limiter
                .check_and_increment(&key, limits.anonymous.rule())
                .await;
            if !decision.allowed {
                return AppError::RateLimited(decision).into_response();
            }

            let mut response = rejection.into_response();
            apply_rate_limit_headers(&mut response, &decision);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn missing_header_has_no_token() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
