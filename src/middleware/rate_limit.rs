use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::keys::secret;
use crate::models::api_key::{ApiKey, UsageOutcome};
use crate::store::Store;

/// Key validator and usage-based rate limiter.
///
/// A key is admitted when it exists, belongs to the expected owner (if one is
/// given), has not expired, and `usage < rate_limit`. Admission and the usage
/// increment happen in one conditional write in the store, so concurrent
/// callers cannot push a key past its limit.
#[derive(Clone)]
pub struct KeyValidator {
    store: Arc<dyn Store>,
}

impl KeyValidator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate `token` and charge one unit of usage.
    pub async fn admit(&self, token: &str, owner: Option<Uuid>) -> Result<ApiKey, AppError> {
        let mut key = self.resolve(token, owner).await?;

        match self
            .store
            .consume_usage(key.id, Utc::now())
            .await
            .map_err(AppError::database)?
        {
            UsageOutcome::Admitted(usage) => {
                key.usage = usage;
                tracing::debug!(key_id = %key.id, usage, limit = key.rate_limit, "api key admitted");
                Ok(key)
            }
            UsageOutcome::LimitReached => {
                tracing::warn!(
                    rate_limit = true,
                    key_id = %key.id,
                    limit = key.rate_limit,
                    "api key rate limit exceeded"
                );
                Err(AppError::RateLimitExceeded)
            }
            UsageOutcome::Unavailable => Err(AppError::Unauthorized("Invalid API key".into())),
        }
    }

    /// Same checks as [`admit`](Self::admit) without consuming usage.
    pub async fn inspect(&self, token: &str, owner: Option<Uuid>) -> Result<ApiKey, AppError> {
        let key = self.resolve(token, owner).await?;
        if key.is_exhausted() {
            return Err(AppError::RateLimitExceeded);
        }
        Ok(key)
    }

    async fn resolve(&self, token: &str, owner: Option<Uuid>) -> Result<ApiKey, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized("API key is required".into()));
        }

        let digest = secret::hash(token);
        let key = self
            .store
            .find_key_by_hash(&digest)
            .await
            .map_err(AppError::database)?
            .filter(|k| secret::digests_match(&k.key_hash, &digest));

        let Some(key) = key else {
            tracing::warn!(key = %secret::mask(token), "unknown api key presented");
            return Err(AppError::Unauthorized("Invalid API key".into()));
        };

        if let Some(owner) = owner {
            if key.user_id != owner {
                tracing::warn!(key_id = %key.id, "api key presented by a user who does not own it");
                return Err(AppError::Unauthorized("Invalid API key".into()));
            }
        }

        if key.is_expired(Utc::now()) {
            return Err(AppError::Unauthorized("API key has expired".into()));
        }

        Ok(key)
    }
}
