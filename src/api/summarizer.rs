use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use super::invalid_body;
use crate::errors::AppError;
use crate::summarizer::{github::RepoRef, RepositorySummary};
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    #[serde(rename = "repositoryUrl")]
    pub repository_url: Option<String>,
}

/// POST /api/github-summarizer — digest a public repository's README.
///
/// Usage is charged once the key is admitted, before the upstream fetches;
/// malformed requests are rejected before any charge.
pub async fn summarize_repository(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<RepositorySummary>, AppError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("API key is required".into()))?;

    let Json(payload) = payload.map_err(invalid_body)?;
    let repository_url = payload
        .repository_url
        .ok_or_else(|| AppError::Validation("repositoryUrl is required".into()))?;
    let repo = RepoRef::parse(&repository_url)?;

    let key = state.validator.admit(api_key, None).await?;
    tracing::info!(key_id = %key.id, usage = key.usage, repo = %repo, "summarizer call admitted");

    let summary = state.summarizer.summarize(&repo).await?;
    Ok(Json(summary))
}
