// GET handlers: version, resources, metric history

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use super::AppState;
use crate::models::CaptureInterval;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Span returned when `from` is omitted.
const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/resources: tables and indexes of the monitored database.
pub(super) async fn list_resources_handler(State(state): State<AppState>) -> Response {
    match state.repo.list_resources(state.database.id).await {
        Ok(resources) => Json(resources).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct MetricsQuery {
    interval: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// GET /api/resources/{name}/metrics: records of one interval in [from, to),
/// oldest first. Defaults: hourly, the last seven days.
pub(super) async fn resource_metrics_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let interval = match query.interval.as_deref() {
        None => CaptureInterval::FINEST,
        Some(s) => match s.parse::<CaptureInterval>() {
            Ok(interval) => interval,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        },
    };
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query
        .from
        .unwrap_or(to - TimeDelta::days(DEFAULT_LOOKBACK_DAYS));
    if from > to {
        return error_response(StatusCode::BAD_REQUEST, "from must not be after to".into());
    }

    let resource = match state.repo.find_resource(state.database.id, &name).await {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, format!("unknown resource {name}"));
        }
        Err(e) => return internal_error(e),
    };

    match state
        .repo
        .get_metrics_by_time_range(resource.id, interval, from, to)
        .await
    {
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error(e),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}
