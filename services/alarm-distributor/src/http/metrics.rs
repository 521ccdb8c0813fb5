use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

/// The handful of counters/gauges spec §1 requires operators to observe,
/// exposed as plain JSON rather than a Prometheus text-format exporter
/// (out of scope per §1/§13).
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
