use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use common::storage::types::job::Job;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job: Option<Job> = state
        .db
        .get_item(&job_id)
        .await
        .map_err(|e| ApiError::from(common::error::AppError::Database(e)))?;

    let Some(job) = job else {
        return Err(ApiError::NotFound(format!("job {job_id} not found")));
    };

    Ok(Json(json!({
        "job_id": job.id,
        "type": job.kind.as_str(),
        "status": job.status.as_str(),
        "progress": job.progress,
        "stage": job.stage,
        "error": job.error,
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
        "completed_at": job.completed_at.map(|t| t.to_rfc3339()),
    })))
}
