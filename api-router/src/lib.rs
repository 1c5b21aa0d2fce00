use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{delete, get, post},
    Router,
};
use routes::{
    docs::{delete_document, upsert_batch},
    health::{devices, health, live},
    index::rebuild_index,
    ingest::ingest_document,
    jobs::get_job,
    search::search,
    strategies::{detect_strategy, list_strategies, test_strategy},
};
use tower_http::trace::TraceLayer;

pub mod api_state;
pub mod error;
mod routes;

/// The full JSON API surface: synchronous ingest and search, asynchronous
/// batch/rebuild, job and health introspection, and chunking diagnostics.
pub fn api_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/ingest", post(ingest_document))
        .route("/search", post(search))
        .route("/docs/upsert/batch", post(upsert_batch))
        .route("/docs/{doc_id}", delete(delete_document))
        .route("/index/rebuild", post(rebuild_index))
        .route("/jobs/{job_id}", get(get_job))
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/devices", get(devices))
        .route("/strategies/list", get(list_strategies))
        .route("/strategies/detect", post(detect_strategy))
        .route("/strategies/test", post(test_strategy))
        .layer(TraceLayer::new_for_http())
}
