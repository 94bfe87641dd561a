mod auth_handlers;
mod metric_handlers;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::middleware::admit;
use crate::middleware::rate_limit::{throttle_login, throttle_otp};
use crate::state::AppState;

/// Anonymous login routes, throttled per client IP or per phone number.
pub fn auth_router(state: AppState) -> Router<AppState> {
    let login_routes = Router::new()
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/otp/verify", post(auth_handlers::otp_verify))
        .route_layer(from_fn_with_state(state.clone(), throttle_login));

    let otp_routes = Router::new()
        .route("/auth/otp/request", post(auth_handlers::otp_request))
        .route_layer(from_fn_with_state(state, throttle_otp));

    login_routes.merge(otp_routes)
}

/// Routes behind request admission.
pub fn protected_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/me", get(auth_handlers::me))
        .route(
            "/metrics",
            get(metric_handlers::list_metrics).post(metric_handlers::record_metric),
        )
        .route_layer(from_fn_with_state(state, admit))
}
