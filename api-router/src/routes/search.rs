use axum::{extract::State, response::IntoResponse, Json};
use retrieval_pipeline::{SearchRequest, DEFAULT_TOP_K, MAX_TOP_K};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub tenant_id: String,
    pub project_id: String,
    pub query: Option<String>,
    pub question: Option<String>,
    pub user_id: Option<String>,
    pub document_type: Option<String>,
    pub top_k: Option<usize>,
}

pub async fn search(
    State(state): State<ApiState>,
    Json(body): Json<SearchBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.tenant_id.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "tenant_id must not be empty".to_owned(),
        ));
    }
    if body.project_id.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "project_id must not be empty".to_owned(),
        ));
    }

    // Both spellings are accepted; `query` wins when both are present.
    let query = body
        .query
        .as_deref()
        .or(body.question.as_deref())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::ValidationError("query must not be empty".to_owned()))?;

    let hits = state
        .search
        .search(&SearchRequest {
            tenant_id: body.tenant_id.clone(),
            namespace: body.project_id.clone(),
            query: query.to_owned(),
            document_type: body.document_type.clone(),
            top_k: body.top_k.unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K),
        })
        .await?;

    Ok(Json(json!({ "chunks": hits })))
}
