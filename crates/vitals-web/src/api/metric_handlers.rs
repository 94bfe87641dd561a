use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

pub async fn record_metric(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<RecordMetricRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MetricEntryDto>), AppError> {
    let Json(body) = payload?;

    if !body.value.is_finite() || body.value < 0.0 {
        return Err(AppError::BadRequest(
            "value must be a non-negative number".to_string(),
        ));
    }

    let entry = MetricEntryDto {
        kind: body.kind,
        value: body.value,
        recorded_at: body.recorded_at.unwrap_or_else(|| state.clock.now()),
    };
    state.metrics.record(&user.id, entry.clone());
    tracing::debug!(identity = %user.id, kind = ?entry.kind, "Metric recorded");

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_metrics(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<ListMetricsQuery>, QueryRejection>,
) -> Result<Json<MetricListResponse>, AppError> {
    let Query(query) = query?;
    Ok(Json(MetricListResponse {
        success: true,
        entries: state.metrics.list(&user.id, query.kind),
    }))
}
