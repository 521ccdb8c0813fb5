//! History reads (spec §4.L): `recent`, `in_window`, `by_device`,
//! `by_severity`, `by_type`, offset pagination, and cursor pagination.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use fw_protocol::Severity;
use serde::Deserialize;

use super::response::bad_request;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    start_ms: i64,
    end_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    offset: usize,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    before_ms: i64,
    limit: Option<usize>,
}

pub async fn recent(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.history.recent(q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

pub async fn in_window(State(state): State<AppState>, Query(q): Query<WindowQuery>) -> impl IntoResponse {
    Json(state.history.in_window(q.start_ms, q.end_ms).await).into_response()
}

pub async fn by_device(State(state): State<AppState>, Path(device_id): Path<String>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.history.by_device(&device_id, q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

pub async fn by_severity(State(state): State<AppState>, Path(severity): Path<String>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    let severity = match parse_severity(&severity) {
        Some(s) => s,
        None => return bad_request(format!("unknown severity '{severity}'")),
    };
    Json(state.history.by_severity(severity, q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

pub async fn by_type(State(state): State<AppState>, Path(alarm_type): Path<String>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(state.history.by_type(&alarm_type, q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

pub async fn page(State(state): State<AppState>, Query(q): Query<PageQuery>) -> impl IntoResponse {
    Json(state.history.page(q.offset, q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

pub async fn cursor(State(state): State<AppState>, Query(q): Query<CursorQuery>) -> impl IntoResponse {
    Json(state.history.cursor(q.before_ms, q.limit.unwrap_or(DEFAULT_LIMIT)).await).into_response()
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.to_lowercase().as_str() {
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        _ => None,
    }
}
