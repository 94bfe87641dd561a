use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use vitals_core::Decision;

use crate::middleware::rate_limit::apply_rate_limit_headers;

const REDIRECT_TO_LOGIN: &str = "redirect_to_login";

#[derive(Debug)]
pub enum AppError {
    /// No bearer token on a guarded route.
    CredentialMissing,
    /// Malformed, tampered or expired token, or an account that is gone or
    /// disabled. One message for all of them.
    InvalidCredential,
    /// Valid token superseded by a newer login.
    SessionSuperseded,
    RateLimited(Decision),
    /// Login attempt rejected.
    Auth(String),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'static str>,
}

#[derive(Serialize)]
struct RateLimitBody {
    error: &'static str,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::CredentialMissing | AppError::SessionSuperseded | AppError::Auth(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::InvalidCredential => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, action) = match self {
            AppError::RateLimited(decision) => {
                let body = RateLimitBody {
                    error: "Too many requests",
                    retry_after: decision.reset_in_seconds,
                };
                let mut response = (status, axum::Json(body)).into_response();
                apply_rate_limit_headers(&mut response, &decision);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(decision.reset_in_seconds));
                return response;
            }
            AppError::CredentialMissing => {
                ("Access token required".to_string(), Some(REDIRECT_TO_LOGIN))
            }
            AppError::InvalidCredential => {
                ("Invalid or expired token".to_string(), Some(REDIRECT_TO_LOGIN))
            }
            AppError::SessionSuperseded => (
                "Session expired due to login from another device".to_string(),
                Some(REDIRECT_TO_LOGIN),
            ),
            AppError::Auth(msg) | AppError::BadRequest(msg) | AppError::NotFound(msg) => {
                (msg, None)
            }
            AppError::Internal(msg) => {
                // Log the real error server-side, return generic message to client
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None)
            }
        };

        let body = ErrorBody {
            success: false,
            error: message,
            action,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", e);
        AppError::Internal("Internal server error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn superseded_session_is_401_with_redirect() {
        let response = AppError::SessionSuperseded.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "success": false,
                "error": "Session expired due to login from another device",
                "action": "redirect_to_login",
            })
        );
    }

    #[tokio::test]
    async fn invalid_credential_is_403_with_redirect() {
        let response = AppError::InvalidCredential.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "success": false,
                "error": "Invalid or expired token",
                "action": "redirect_to_login",
            })
        );
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset_in_seconds: 42,
            degraded: false,
        };
        let response = AppError::RateLimited(decision).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["x-ratelimit-reset"], "42");
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "Too many requests", "retryAfter": 42 })
        );
    }

    #[tokio::test]
    async fn internal_error_hides_detail() {
        let response = AppError::Internal("db exploded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("action").is_none());
    }

    #[test]
    fn missing_credential_is_unauthorized() {
        assert_eq!(AppError::CredentialMissing.status(), StatusCode::UNAUTHORIZED);
    }
}
