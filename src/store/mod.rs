pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::api_key::{ApiKey, ApiKeyPatch, KeyPage, KeyQuery, NewApiKey, UsageOutcome};
use crate::models::user::{NewUser, User};

/// Abstraction over the persistent store.
/// Implementations: PgStore (PostgreSQL), MemoryStore (tests and local runs).
///
/// Every key operation that takes a `user_id` must scope its match to that
/// owner; callers rely on this for tenant isolation.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Users --

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Insert a user, or return the existing row if the e-mail is taken.
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User>;

    // -- API keys --

    async fn insert_key(&self, key: &NewApiKey) -> anyhow::Result<ApiKey>;

    async fn list_keys(&self, user_id: Uuid, query: &KeyQuery) -> anyhow::Result<KeyPage>;

    async fn get_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<Option<ApiKey>>;

    async fn find_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKey>>;

    async fn update_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        patch: &ApiKeyPatch,
    ) -> anyhow::Result<Option<ApiKey>>;

    async fn delete_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<bool>;

    /// Atomically increment `usage` if the key is live and below its limit.
    async fn consume_usage(&self, key_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<UsageOutcome>;

    async fn reset_usage(&self, key_id: Uuid) -> anyhow::Result<bool>;

    /// Cheap round-trip used by the readiness probe.
    async fn ping(&self) -> anyhow::Result<()>;
}
