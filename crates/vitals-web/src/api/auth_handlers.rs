use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use vitals_core::rate_limit::normalize_phone;
use vitals_core::SessionError;

use crate::auth::middleware::AuthUser;
use crate::auth::otp::{mask_phone, OtpError};
use crate::auth::password::{verify_against_dummy, verify_password_blocking};
use crate::config::UserConfig;
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

fn session_failure(e: SessionError) -> AppError {
    match e {
        SessionError::IdentityNotFound(_) | SessionError::IdentityInactive(_) => {
            AppError::Auth(INVALID_CREDENTIALS.to_string())
        }
        other => AppError::Internal(other.to_string()),
    }
}

/// Advances the session marker and issues a token stamped with it. Every
/// token the user held before stops being accepted.
async fn complete_login(state: &AppState, user: &UserConfig) -> Result<Json<LoginResponse>, AppError> {
    let marker = state
        .sessions
        .record_login(&user.id)
        .await
        .map_err(session_failure)?;

    let issued = state
        .tokens
        .issue_at(&user.id, marker)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(identity = %user.id, "Login succeeded");

    Ok(Json(LoginResponse {
        success: true,
        token: issued.token,
        expires_at: issued.expires_at.timestamp(),
        user: UserDto {
            id: user.id.clone(),
            username: user.username.clone(),
        },
    }))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = payload?;

    let user = match (body.username.as_deref(), body.phone.as_deref()) {
        (Some(username), _) => state.users.find_by_username(username),
        (None, Some(phone)) => state.users.find_by_phone(phone),
        (None, None) => {
            return Err(AppError::BadRequest(
                "username or phone is required".to_string(),
            ))
        }
    }
    .cloned();

    let Some(user) = user else {
        verify_against_dummy(body.password).await;
        tracing::warn!("Failed login attempt for unknown user");
        return Err(AppError::Auth(INVALID_CREDENTIALS.to_string()));
    };

    let valid = verify_password_blocking(user.password_hash.clone(), body.password).await?;
    if !valid {
        tracing::warn!(identity = %user.id, "Failed login attempt: invalid password");
        return Err(AppError::Auth(INVALID_CREDENTIALS.to_string()));
    }
    if !user.active {
        tracing::warn!(identity = %user.id, "Login refused for disabled account");
        return Err(AppError::Auth("Account is disabled".to_string()));
    }

    complete_login(&state, &user).await
}

pub async fn otp_request(
    State(state): State<AppState>,
    payload: Result<Json<OtpRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = payload?;
    let phone = normalize_phone(&body.phone)
        .ok_or_else(|| AppError::BadRequest("A valid phone number is required".to_string()))?;

    match state.users.find_by_phone(&phone).filter(|u| u.active) {
        Some(user) => {
            let code = state.otp_codes.issue(&phone, &user.id);
            let sender = state.otp_sender.clone();
            let target = phone.clone();
            tokio::spawn(async move {
                if let Err(e) = sender.send(&target, &code).await {
                    tracing::error!(phone = %mask_phone(&target), "Failed to send one-time code: {e}");
                }
            });
        }
        None => {
            tracing::debug!(phone = %mask_phone(&phone), "Code requested for unregistered phone");
        }
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "If the number is registered, a code has been sent".to_string(),
    }))
}

pub async fn otp_verify(
    State(state): State<AppState>,
    payload: Result<Json<OtpVerifyRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = payload?;
    let phone = normalize_phone(&body.phone)
        .ok_or_else(|| AppError::BadRequest("A valid phone number is required".to_string()))?;

    let identity = state
        .otp_codes
        .verify(&phone, body.code.trim())
        .map_err(|e| {
            tracing::warn!(phone = %mask_phone(&phone), reason = ?e, "One-time code rejected");
            match e {
                OtpError::TooManyAttempts => {
                    AppError::Auth("Too many attempts, request a new code".to_string())
                }
                OtpError::Missing | OtpError::Mismatch => {
                    AppError::Auth("Invalid or expired code".to_string())
                }
            }
        })?;

    let user = state
        .users
        .get(&identity)
        .filter(|u| u.active)
        .cloned()
        .ok_or_else(|| AppError::Auth(INVALID_CREDENTIALS.to_string()))?;

    complete_login(&state, &user).await
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<LogoutResponse>, AppError> {
    state
        .sessions
        .record_login(&user.id)
        .await
        .map_err(session_failure)?;

    tracing::info!(identity = %user.id, "Logged out");
    Ok(Json(LogoutResponse {
        success: true,
        action: "redirect_to_login",
    }))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<MeResponse>, AppError> {
    let profile = state
        .users
        .get(&user.id)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(MeResponse {
        success: true,
        user: UserDto {
            id: profile.id.clone(),
            username: profile.username.clone(),
        },
        session_issued_at: user.issued_at,
    }))
}
