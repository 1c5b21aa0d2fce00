use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Liveness probe: always returns 200 to indicate the process is running.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness and dependency health: metadata store, index directory and job
/// queue, plus build information for operators.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.client.query("RETURN true").await.is_ok();
    let index_store_ok = state.index_store.is_writable();
    let jobqueue_ok = state
        .db
        .client
        .query("SELECT count() FROM jobs GROUP ALL")
        .await
        .is_ok();
    let ok = db_ok && index_store_ok && jobqueue_ok;

    let body = Json(json!({
        "ok": ok,
        "db_ok": db_ok,
        "index_store_ok": index_store_ok,
        "jobqueue_ok": jobqueue_ok,
        "build_info": {
            "version": env!("CARGO_PKG_VERSION"),
            "embedding_model": state.config.embedding_model,
            "embedding_version": state.config.embedding_version,
        }
    }));

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

/// Per-device orchestrator state; telemetry values are opaque pass-through.
pub async fn devices(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({ "devices": state.devices.report() }))
}
