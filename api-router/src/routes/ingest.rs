use axum::{extract::State, response::IntoResponse, Json};
use common::storage::types::ingest::IngestDoc;
use ingestion_pipeline::ProgressReporter;
use serde_json::json;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

/// Synchronous ingest: chunk, enrich, embed and persist before responding.
/// Re-sending identical text is a no-op reported as `chunks_added: 0`.
pub async fn ingest_document(
    State(state): State<ApiState>,
    Json(request): Json<IngestDoc>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(tenant_id = %request.tenant_id, filename = %request.filename, "ingest request");

    let outcome = state
        .pipeline
        .upsert_document(&request, &ProgressReporter::noop())
        .await?;

    Ok(Json(json!({
        "project_id": request.project_id,
        "document_type": outcome.document_type,
        "doc_id": outcome.doc_id,
        "chunks_added": outcome.chunks_added,
    })))
}
