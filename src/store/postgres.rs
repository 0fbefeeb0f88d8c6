use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::Store;
use crate::models::api_key::{ApiKey, ApiKeyPatch, KeyPage, KeyQuery, NewApiKey, UsageOutcome};
use crate::models::user::{NewUser, User};

const KEY_COLUMNS: &str = "id, user_id, name, description, key_hash, key_prefix, key_type, usage, rate_limit, created_at, updated_at, expires_at";
const USER_COLUMNS: &str = "id, email, name, avatar_url, provider, provider_id, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    // -- User Operations --

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (email, name, avatar_url, provider, provider_id)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar_url)
        .bind(&user.provider)
        .bind(&user.provider_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Key Operations --

    async fn insert_key(&self, key: &NewApiKey) -> anyhow::Result<ApiKey> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            r#"INSERT INTO api_keys (id, user_id, name, description, key_hash, key_prefix, key_type, usage, rate_limit, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9)
               RETURNING {KEY_COLUMNS}"#
        ))
        .bind(key.id)
        .bind(key.user_id)
        .bind(&key.name)
        .bind(&key.description)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(key.key_type)
        .bind(key.rate_limit)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_keys(&self, user_id: Uuid, query: &KeyQuery) -> anyhow::Result<KeyPage> {
        let key_type = query.key_type.map(|t| t.as_str());

        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            r#"SELECT {KEY_COLUMNS} FROM api_keys
               WHERE user_id = $1 AND ($2::TEXT IS NULL OR key_type = $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3 OFFSET $4"#
        ))
        .bind(user_id)
        .bind(key_type)
        .bind(query.limit as i64)
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM api_keys WHERE user_id = $1 AND ($2::TEXT IS NULL OR key_type = $2)",
        )
        .bind(user_id)
        .bind(key_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(KeyPage { keys, total })
    }

    async fn get_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1 AND user_id = $2"
        ))
        .bind(key_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_key(
        &self,
        user_id: Uuid,
        key_id: Uuid,
        patch: &ApiKeyPatch,
    ) -> anyhow::Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKey>(&format!(
            r#"UPDATE api_keys
               SET name = COALESCE($3, name),
                   key_type = COALESCE($4, key_type),
                   description = COALESCE($5, description),
                   updated_at = NOW()
               WHERE id = $1 AND user_id = $2
               RETURNING {KEY_COLUMNS}"#
        ))
        .bind(key_id)
        .bind(user_id)
        .bind(&patch.name)
        .bind(patch.key_type.map(|t| t.as_str()))
        .bind(&patch.description)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_key(&self, user_id: Uuid, key_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_usage(&self, key_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<UsageOutcome> {
        // Single conditional UPDATE: concurrent callers serialize on the row lock,
        // so the limit can never be overshot.
        let usage = sqlx::query_scalar::<_, i64>(
            r#"UPDATE api_keys
               SET usage = usage + 1
               WHERE id = $1
                 AND usage < rate_limit
                 AND (expires_at IS NULL OR expires_at > $2)
               RETURNING usage"#,
        )
        .bind(key_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(usage) = usage {
            return Ok(UsageOutcome::Admitted(usage));
        }

        // Nothing written: tell a spent key apart from a vanished/expired one.
        let exhausted = sqlx::query_scalar::<_, bool>(
            r#"SELECT usage >= rate_limit
               FROM api_keys
               WHERE id = $1 AND (expires_at IS NULL OR expires_at > $2)"#,
        )
        .bind(key_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match exhausted {
            Some(true) => UsageOutcome::LimitReached,
            _ => UsageOutcome::Unavailable,
        })
    }

    async fn reset_usage(&self, key_id: Uuid) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE api_keys SET usage = 0, updated_at = NOW() WHERE id = $1")
                .bind(key_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
