//! API key lifecycle: create, list, fetch, edit, delete and reset keys,
//! always scoped to the owning user.

pub mod secret;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::api_key::{ApiKey, ApiKeyPatch, KeyPage, KeyQuery, KeyType, NewApiKey};
use crate::store::Store;

pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_NAME_LEN: usize = 100;

/// Input to [`KeyManager::create`]. Strings are validated, not trusted.
#[derive(Debug, Clone, Default)]
pub struct CreateKey {
    pub name: Option<String>,
    pub key_type: Option<String>,
    pub description: Option<String>,
    /// Lifetime in seconds.
    pub ttl_secs: Option<i64>,
}

/// Input to [`KeyManager::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdateKey {
    pub name: Option<String>,
    pub key_type: Option<String>,
    pub description: Option<String>,
}

/// A newly created key together with the only copy of its secret.
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub key: ApiKey,
    pub secret: String,
}

#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn Store>,
    default_rate_limit: i64,
    prefix: String,
}

impl KeyManager {
    pub fn new(store: Arc<dyn Store>, default_rate_limit: i64, prefix: impl Into<String>) -> Self {
        Self {
            store,
            default_rate_limit,
            prefix: prefix.into(),
        }
    }

    pub async fn create(&self, user_id: Uuid, req: CreateKey) -> Result<CreatedKey, AppError> {
        let (name, key_type) = match (non_blank(req.name), non_blank(req.key_type)) {
            (Some(name), Some(key_type)) => (name, key_type),
            _ => {
                return Err(AppError::Validation(
                    "Name and type are required fields".into(),
                ))
            }
        };
        let name = validate_name(name)?;
        let key_type = parse_type(&key_type)?;

        let expires_at = match req.ttl_secs {
            Some(ttl) if ttl <= 0 => {
                return Err(AppError::Validation("expiresIn must be a positive number of seconds".into()))
            }
            Some(ttl) => Some(
                Duration::try_seconds(ttl)
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .ok_or_else(|| AppError::Validation("expiresIn is out of range".into()))?,
            ),
            None => None,
        };

        let generated = secret::generate(&self.prefix);
        let new_key = NewApiKey {
            id: Uuid::new_v4(),
            user_id,
            name,
            description: non_blank(req.description),
            key_hash: generated.hash,
            key_prefix: generated.display_prefix,
            key_type,
            rate_limit: self.default_rate_limit,
            expires_at,
        };

        let key = self
            .store
            .insert_key(&new_key)
            .await
            .map_err(AppError::database)?;

        tracing::info!(
            key_id = %key.id,
            user_id = %user_id,
            key_type = %key.key_type,
            rate_limit = key.rate_limit,
            "api key created"
        );

        Ok(CreatedKey {
            key,
            secret: generated.plaintext,
        })
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        page: Option<u32>,
        limit: Option<u32>,
        key_type: Option<&str>,
    ) -> Result<(KeyPage, KeyQuery), AppError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(10);
        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let key_type = match key_type.filter(|t| !t.trim().is_empty()) {
            Some(t) => Some(parse_type(t)?),
            None => None,
        };

        let query = KeyQuery { page, limit, key_type };
        let keys = self
            .store
            .list_keys(user_id, &query)
            .await
            .map_err(AppError::database)?;
        Ok((keys, query))
    }

    pub async fn get(&self, user_id: Uuid, key_id: Uuid) -> Result<ApiKey, AppError> {
        self.store
            .get_key(user_id, key_id)
            .await
            .map_err(AppError::database)?
            .ok_or_else(not_found)
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        req: UpdateKey,
    ) -> Result<ApiKey, AppError> {
        let name = match req.name {
            Some(name) => Some(validate_name(
                non_blank(Some(name)).ok_or_else(|| AppError::Validation("Name must not be empty".into()))?,
            )?),
            None => None,
        };
        let key_type = match req.key_type {
            Some(t) => Some(parse_type(&t)?),
            None => None,
        };
        let patch = ApiKeyPatch {
            name,
            key_type,
            description: req.description.map(|d| d.trim().to_string()),
        };
        if patch.is_empty() {
            return Err(AppError::Validation(
                "At least one of name, type or description is required".into(),
            ));
        }

        let key = self
            .store
            .update_key(user_id, key_id, &patch)
            .await
            .map_err(AppError::database)?
            .ok_or_else(not_found)?;

        tracing::info!(key_id = %key_id, user_id = %user_id, "api key updated");
        Ok(key)
    }

    pub async fn delete(&self, user_id: Uuid, key_id: Uuid) -> Result<(), AppError> {
        let deleted = self
            .store
            .delete_key(user_id, key_id)
            .await
            .map_err(AppError::database)?;
        if !deleted {
            return Err(not_found());
        }
        tracing::info!(key_id = %key_id, user_id = %user_id, "api key deleted");
        Ok(())
    }

    /// Administrative reset of a spent key. Not reachable from the HTTP API.
    pub async fn reset_usage(&self, key_id: Uuid) -> Result<(), AppError> {
        let reset = self
            .store
            .reset_usage(key_id)
            .await
            .map_err(AppError::database)?;
        if !reset {
            return Err(not_found());
        }
        tracing::info!(key_id = %key_id, "api key usage reset");
        Ok(())
    }
}

fn not_found() -> AppError {
    AppError::NotFound("API key not found".into())
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn validate_name(name: String) -> Result<String, AppError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name)
}

fn parse_type(s: &str) -> Result<KeyType, AppError> {
    s.parse::<KeyType>().map_err(AppError::Validation)
}
