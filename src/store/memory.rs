//! In-memory `Store` for tests and `serve --in-memory` local runs.
//!
//! State is owned by the instance (no statics), so two stores never share
//! rows. The check-and-increment in `consume_usage` runs under the DashMap
//! shard lock of the key's entry, which gives the same at-most-limit
//! guarantee as the conditional UPDATE in PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::Store;
use crate::models::api_key::{ApiKey, ApiKeyPatch, KeyPage, KeyQuery, NewApiKey, UsageOutcome};
use crate::models::user::{NewUser, User};

#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<Uuid, User>>,
    /// e-mail → user id; the entry lock makes first sign-in race-free.
    emails: Arc<DashMap<String, Uuid>>,
    keys: Arc<DashMap<Uuid, ApiKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .emails
            .get(email)
            .and_then(|id| self.users.get(id.value()).map(|u| u.value().clone())))
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let id = *self
            .emails
            .entry(user.email.clone())
            .or_insert_with(|| {
                let row = User {
                    id: Uuid::new_v4(),
                    email: user.email.clone(),
                    name: user.name.clone(),
                    avatar_url: user.avatar_url.clone(),
                    provider: user.provider.clone(),
                    provider_id: user.provider_id.clone(),
                    created_at: Utc::now(),
                };
                let id = row.id;
                self.users.insert(id, row);
                id
            })
            .value();
        self.users
            .get(&id)
            .map(|u| u.value().clone())
            .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
    }

    async fn insert_key(&self, key: &NewApiKey) -> anyhow::Result<ApiKey> {
        if !self.users.contains_key(&key.user_id) {
            anyhow::bail!("foreign key violation: user {} does not exist", key.user_id);
        }
        if self.keys.iter().any(|k| k.key_hash == key.key_hash) {
            anyhow::bail!("unique violation: key_hash already exists");
        }
        let now = Utc::now();
        let row = ApiKey {
            id: key.id,
            user_id: key.user_id,
            name: key.name.clone(),
            description: key.description.clone(),
            key_hash: key.key_hash.clone(),
            key_prefix: key.key_prefix.clone(),
            key_type: key.key_type,
            usage: 0,
            rate_limit: key.rate_limit,
            created_at: now,
            updated_at: now,
            expires_at: key.expires_at,
        };
        self.keys.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_keys(&self, user_id: Uuid, query: &KeyQuery) -> anyhow::Result<KeyPage> {
        let mut keys: Vec<ApiKey> = self
            .keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .filter(|k| query.key_type.map_or(true, |t| k.key_type == t))
            .map(|k| k.value().clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = keys.len() as i64;
        let keys = keys
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok(KeyPage { keys, total })
    }

    async fn get_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<Option<ApiKey>> {
        Ok(self
            .keys
            .get(&key_id)
            .filter(|k| k.user_id == user_id)
            .map(|k| k.value().clone()))
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKey>> {
        Ok(self
            .keys
            .iter()
            .find(|k| k.key_hash == key_hash)
            .map(|k| k.value().clone()))
    }

    async fn update_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        patch: &ApiKeyPatch,
    ) -> anyhow::Result<Option<ApiKey>> {
        let Some(mut entry) = self.keys.get_mut(&key_id) else {
            return Ok(None);
        };
        if entry.user_id != user_id {
            return Ok(None);
        }
        if let Some(name) = &patch.name {
            entry.name = name.clone();
        }
        if let Some(key_type) = patch.key_type {
            entry.key_type = key_type;
        }
        if let Some(description) = &patch.description {
            entry.description = Some(description.clone());
        }
        entry.updated_at = Utc::now();
        Ok(Some(entry.value().clone()))
    }

    async fn delete_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .keys
            .remove_if(&key_id, |_, k| k.user_id == user_id)
            .is_some())
    }

    async fn consume_usage(&self, key_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<UsageOutcome> {
        let Some(mut entry) = self.keys.get_mut(&key_id) else {
            return Ok(UsageOutcome::Unavailable);
        };
        if entry.is_expired(now) {
            return Ok(UsageOutcome::Unavailable);
        }
        if entry.is_exhausted() {
            return Ok(UsageOutcome::LimitReached);
        }
        entry.usage += 1;
        Ok(UsageOutcome::Admitted(entry.usage))
    }

    async fn reset_usage(&self, key_id: Uuid) -> anyhow::Result<bool> {
        match self.keys.get_mut(&key_id) {
            Some(mut entry) => {
                entry.usage = 0;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
