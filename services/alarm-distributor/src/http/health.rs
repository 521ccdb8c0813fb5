use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::state::AppState;

/// `GET /healthz` (spec §4.L, §12): a trivial existence check against the
/// history backend. Degraded does not mean down — the service still serves
/// reads and writes via the fallback ring — so this returns 200 with
/// `"degraded": true` rather than failing the probe outright.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let available = state.history.is_available().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "history_backend_available": available,
        })),
    )
}
