use axum::{extract::State, response::IntoResponse, Json};
use ingestion_pipeline::chunking::{
    chunk_document, detection_scores, registry, select_strategy, DocumentHints,
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// Registered strategies with their default limits, in priority order.
pub async fn list_strategies() -> impl IntoResponse {
    let strategies: Vec<_> = registry()
        .iter()
        .map(|strategy| {
            let defaults = strategy.defaults();
            json!({
                "name": strategy.name(),
                "max_chars": defaults.max_chars,
                "overlap": defaults.overlap,
            })
        })
        .collect();

    Json(json!({ "strategies": strategies }))
}

#[derive(Debug, Deserialize)]
pub struct DetectBody {
    pub text: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub document_type: Option<String>,
    pub source: Option<String>,
}

/// Per-strategy applicability scores on a text sample plus the strategy the
/// selection rule would pick.
pub async fn detect_strategy(
    State(_state): State<ApiState>,
    Json(body): Json<DetectBody>,
) -> Result<impl IntoResponse, ApiError> {
    let hints = DocumentHints {
        filename: body.filename.as_deref().unwrap_or(""),
        mime_type: body.mime_type.as_deref(),
        document_type: body.document_type.as_deref(),
        source: body.source.as_deref(),
    };

    let scores: serde_json::Map<String, serde_json::Value> = detection_scores(&body.text, &hints)
        .into_iter()
        .map(|(name, score)| (name.to_owned(), json!(score)))
        .collect();
    let selected = select_strategy(&body.text, &hints, None).map_err(ApiError::from)?;

    Ok(Json(json!({
        "scores": scores,
        "selected": selected.name(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct TestBody {
    pub text: String,
    pub strategy: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub document_type: Option<String>,
    pub source: Option<String>,
    pub chunk_overlap: Option<usize>,
}

/// Dry-run chunking: returns the chosen strategy, the chunk count and the
/// size of each chunk, without touching any store.
pub async fn test_strategy(
    State(_state): State<ApiState>,
    Json(body): Json<TestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let hints = DocumentHints {
        filename: body.filename.as_deref().unwrap_or(""),
        mime_type: body.mime_type.as_deref(),
        document_type: body.document_type.as_deref(),
        source: body.source.as_deref(),
    };

    let outcome = chunk_document(
        &body.text,
        &hints,
        body.strategy.as_deref(),
        body.chunk_overlap,
    )
    .map_err(ApiError::from)?;

    let sizes: Vec<usize> = outcome.chunks.iter().map(|c| c.chars().count()).collect();

    Ok(Json(json!({
        "strategy": outcome.strategy,
        "count": outcome.chunks.len(),
        "sizes": sizes,
    })))
}
