use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::storage::types::job::{Job, JobKind, JobPayload};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct RebuildBody {
    pub tenant_id: String,
    pub namespace: String,
    pub document_type: Option<String>,
    #[serde(default)]
    pub reembed: bool,
}

/// Enqueue an index rebuild for every partition of the tenant/namespace
/// pair. With `reembed` this is also the embedding-version migration path.
pub async fn rebuild_index(
    State(state): State<ApiState>,
    Json(body): Json<RebuildBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.tenant_id.trim().is_empty() || body.namespace.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "tenant_id and namespace must not be empty".to_owned(),
        ));
    }

    let job = Job::enqueue(
        &state.db,
        JobKind::Rebuild,
        JobPayload::Rebuild {
            tenant_id: body.tenant_id,
            namespace: body.namespace,
            document_type: body.document_type,
            reembed: body.reembed,
        },
    )
    .await
    .map_err(ApiError::from)?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job.id }))))
}
