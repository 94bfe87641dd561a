//! Throttling for the anonymous auth routes, plus the client-address and
//! header helpers shared with the admission middleware.

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use vitals_core::{Decision, RateLimitKey, RouteClass};

use crate::config::ProxyNet;
use crate::error::AppError;
use crate::state::AppState;

/// Largest body the phone-keyed throttle will buffer to find the number.
const PHONE_BODY_LIMIT: usize = 16 * 1024;

pub fn apply_rate_limit_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_in_seconds));
}

/// Resolves the address rate-limit keys are built from.
///
/// Forwarding headers are read only when the socket peer is a trusted
/// proxy. Then the rightmost `X-Forwarded-For` hop that is not itself a
/// trusted proxy wins, followed by `X-Real-IP`. Any other peer is the
/// client, whatever headers it sends.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[ProxyNet]) -> Option<IpAddr> {
    let peer = peer?;
    let is_trusted = |ip: &IpAddr| trusted.iter().any(|net| net.contains(ip));
    if !is_trusted(&peer) {
        return Some(peer);
    }

    let hops: Vec<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').filter_map(|hop| hop.trim().parse().ok()).collect())
        .unwrap_or_default();
    if let Some(ip) = hops.iter().rev().find(|ip| !is_trusted(*ip)).or(hops.first()) {
        return Some(*ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(Some(peer))
}

pub fn request_ip(req: &Request, trusted: &[ProxyNet]) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    client_ip(req.headers(), peer, trusted)
}

/// Forwards when admitted and stamps the quota headers on the response.
async fn forward(decision: Decision, req: Request, next: Next) -> Response {
    if !decision.allowed {
        return AppError::RateLimited(decision).into_response();
    }
    let mut response = next.run(req).await;
    apply_rate_limit_headers(&mut response, &decision);
    response
}

/// Per-IP throttle for password and code-verification logins.
pub async fn throttle_login(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let limits = &state.config.rate_limit;
    let key = RateLimitKey::ip(RouteClass::Login, request_ip(&req, &limits.trusted_proxies));
    let decision = state
        .limiter
        .check_and_increment(&key, limits.login.rule())
        .await;
    forward(decision, req, next).await
}

#[derive(Deserialize)]
struct PhoneField {
    #[serde(default)]
    phone: Option<String>,
}

/// Per-phone throttle for code requests. Falls back to the client IP when
/// the body carries no usable phone number.
pub async fn throttle_otp(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = request_ip(&req, &state.config.rate_limit.trusted_proxies);
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, PHONE_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return AppError::BadRequest("Request body too large".to_string()).into_response(),
    };

    let phone = serde_json::from_slice::<PhoneField>(&bytes)
        .ok()
        .and_then(|f| f.phone);
    let key = RateLimitKey::phone_or_ip(RouteClass::Otp, phone.as_deref(), ip);
    let decision = state
        .limiter
        .check_and_increment(&key, state.config.rate_limit.otp.rule())
        .await;

    forward(decision, Request::from_parts(parts, Body::from(bytes)), next).await
}
