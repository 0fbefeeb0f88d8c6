use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::invalid_body;
use crate::errors::AppError;
use crate::keys::{CreateKey, UpdateKey};
use crate::middleware::session::UserId;
use crate::models::api_key::{ApiKey, KeyType};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub description: Option<String>,
    /// Lifetime in seconds.
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListKeysParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateKeyRequest {
    pub key: Option<String>,
}

/// Key record as returned by the API. `key` carries the plaintext secret
/// only in the create response; everywhere else it is masked.
#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub key: String,
    pub usage: i64,
    pub rate_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl KeyResponse {
    fn masked(key: ApiKey) -> Self {
        let display = key.masked();
        Self::with_secret(key, display)
    }

    fn with_secret(key: ApiKey, secret: String) -> Self {
        Self {
            id: key.id,
            name: key.name,
            description: key.description,
            key_type: key.key_type,
            key: secret,
            usage: key.usage,
            rate_limit: key.rate_limit,
            created_at: key.created_at,
            updated_at: key.updated_at,
            expires_at: key.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub data: Vec<KeyResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct KeySummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
}

#[derive(Debug, Serialize)]
pub struct ValidateKeyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn parse_key_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid key ID format".into()))
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /api/v1/keys — the caller's keys, newest first
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    params: Result<Query<ListKeysParams>, QueryRejection>,
) -> Result<Json<KeyListResponse>, AppError> {
    let Query(params) = params.map_err(|e| {
        AppError::Validation(format!("Invalid query parameters: {}", e.body_text()))
    })?;

    let (page, query) = state
        .keys
        .list(user_id, params.page, params.limit, params.key_type.as_deref())
        .await?;

    let limit = query.limit as i64;
    Ok(Json(KeyListResponse {
        data: page.keys.into_iter().map(KeyResponse::masked).collect(),
        pagination: Pagination {
            page: query.page,
            limit: query.limit,
            total: page.total,
            total_pages: (page.total + limit - 1) / limit,
        },
    }))
}

/// POST /api/v1/keys — issue a new key; the secret is returned only here
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<KeyResponse>), AppError> {
    let Json(payload) = payload.map_err(invalid_body)?;

    let created = state
        .keys
        .create(
            user_id,
            CreateKey {
                name: payload.name,
                key_type: payload.key_type,
                description: payload.description,
                ttl_secs: payload.expires_in,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(KeyResponse::with_secret(created.key, created.secret)),
    ))
}

/// GET /api/v1/keys/:id
pub async fn get_key(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<KeyResponse>, AppError> {
    let key_id = parse_key_id(&id)?;
    let key = state.keys.get(user_id, key_id).await?;
    Ok(Json(KeyResponse::masked(key)))
}

/// PUT /api/v1/keys/:id — edit name, type or description
pub async fn update_key(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    payload: Result<Json<UpdateKeyRequest>, JsonRejection>,
) -> Result<Json<KeyResponse>, AppError> {
    let key_id = parse_key_id(&id)?;
    let Json(payload) = payload.map_err(invalid_body)?;

    let key = state
        .keys
        .update(
            user_id,
            key_id,
            UpdateKey {
                name: payload.name,
                key_type: payload.key_type,
                description: payload.description,
            },
        )
        .await?;
    Ok(Json(KeyResponse::masked(key)))
}

/// DELETE /api/v1/keys/:id
pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let key_id = parse_key_id(&id)?;
    state.keys.delete(user_id, key_id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

/// POST /api/v1/validate-key — check one of the caller's keys without charging usage
pub async fn validate_key(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    payload: Result<Json<ValidateKeyRequest>, JsonRejection>,
) -> Result<Json<ValidateKeyResponse>, AppError> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let token = payload
        .key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::Validation("API key is required".into()))?;

    let response = match state.validator.inspect(&token, Some(user_id)).await {
        Ok(key) => ValidateKeyResponse {
            valid: true,
            key: Some(KeySummary {
                id: key.id,
                name: key.name,
                key_type: key.key_type,
            }),
            reason: None,
        },
        Err(AppError::Unauthorized(reason)) => ValidateKeyResponse {
            valid: false,
            key: None,
            reason: Some(reason),
        },
        Err(AppError::RateLimitExceeded) => ValidateKeyResponse {
            valid: false,
            key: None,
            reason: Some("API key has reached its rate limit".into()),
        },
        Err(e) => return Err(e),
    };

    Ok(Json(response))
}
