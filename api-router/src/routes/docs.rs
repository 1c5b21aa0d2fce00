use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::{
    ingest::IngestDoc,
    job::{Job, JobKind, JobPayload},
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct BatchUpsertBody {
    #[serde(default)]
    pub async_mode: bool,
    pub docs: Vec<IngestDoc>,
}

/// Asynchronous batch upsert: validate at the edge, enqueue one ingest job
/// covering all documents.
pub async fn upsert_batch(
    State(state): State<ApiState>,
    Json(body): Json<BatchUpsertBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.docs.is_empty() {
        return Err(ApiError::ValidationError("docs must not be empty".to_owned()));
    }
    // Malformed documents are rejected here; they are never enqueued.
    for doc in &body.docs {
        doc.validate().map_err(ApiError::from)?;
    }

    let job = Job::enqueue(
        &state.db,
        JobKind::Ingest,
        JobPayload::Ingest { docs: body.docs },
    )
    .await
    .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "job_id": job.id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DeleteDocParams {
    pub tenant_id: String,
    pub namespace: String,
}

/// Soft delete: the document disappears from search immediately; the
/// returned job compacts the dense index in the background.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
    Query(params): Query<DeleteDocParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.tenant_id.trim().is_empty() || params.namespace.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "tenant_id and namespace must not be empty".to_owned(),
        ));
    }

    let outcome = state
        .pipeline
        .delete_document(&params.tenant_id, &params.namespace, &doc_id)
        .await?;

    Ok(Json(json!({
        "deleted": outcome.deleted,
        "chunks_deleted": outcome.chunks_deleted,
        "job_id": outcome.job_id,
    })))
}
