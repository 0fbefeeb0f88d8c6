use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Environment an API key is issued for.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum KeyType {
    Dev,
    Prod,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Dev => "dev",
            KeyType::Prod => "prod",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(KeyType::Dev),
            "prod" => Ok(KeyType::Prod),
            other => Err(format!("invalid key type '{}': expected 'dev' or 'prod'", other)),
        }
    }
}

/// A persisted API key. The secret itself is never stored, only its digest.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub usage: i64,
    pub rate_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage >= self.rate_limit
    }

    /// Masked form shown in listings, e.g. `ak_AbCd…`.
    pub fn masked(&self) -> String {
        format!("{}…", self.key_prefix)
    }
}

/// Insert payload. `key_hash` is computed by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_type: KeyType,
    pub rate_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Editable fields. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyPatch {
    pub name: Option<String>,
    pub key_type: Option<KeyType>,
    pub description: Option<String>,
}

impl ApiKeyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.key_type.is_none() && self.description.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct KeyQuery {
    pub page: u32,
    pub limit: u32,
    pub key_type: Option<KeyType>,
}

impl KeyQuery {
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.limit as i64
    }
}

/// One page of keys plus the unpaginated count.
#[derive(Debug, Clone)]
pub struct KeyPage {
    pub keys: Vec<ApiKey>,
    pub total: i64,
}

/// Outcome of the atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    /// Usage was incremented; carries the new value.
    Admitted(i64),
    /// `usage >= rate_limit`; nothing was written.
    LimitReached,
    /// The key was deleted or expired between lookup and update.
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(usage: i64, rate_limit: i64, expires_at: Option<DateTime<Utc>>) -> ApiKey {
        let now = Utc::now();
        ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "ci".into(),
            description: None,
            key_hash: "00".into(),
            key_prefix: "ak_AbCd".into(),
            key_type: KeyType::Dev,
            usage,
            rate_limit,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    #[test]
    fn test_key_type_parse() {
        assert_eq!("dev".parse::<KeyType>(), Ok(KeyType::Dev));
        assert_eq!(" PROD ".parse::<KeyType>(), Ok(KeyType::Prod));
        assert!("staging".parse::<KeyType>().is_err());
    }

    #[test]
    fn test_expiry_and_exhaustion() {
        let now = Utc::now();
        assert!(!key(0, 10, None).is_expired(now));
        assert!(key(0, 10, Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!key(0, 10, Some(now + Duration::hours(1))).is_expired(now));
        assert!(key(10, 10, None).is_exhausted());
        assert!(!key(9, 10, None).is_exhausted());
    }

    #[test]
    fn test_serialization_hides_hash() {
        let json = serde_json::to_value(key(3, 10, None)).unwrap();
        assert!(json.get("key_hash").is_none());
        assert_eq!(json["type"], "dev");
        assert_eq!(json["usage"], 3);
    }

    #[test]
    fn test_query_offset() {
        let q = KeyQuery { page: 3, limit: 10, key_type: None };
        assert_eq!(q.offset(), 20);
        let q = KeyQuery { page: 0, limit: 10, key_type: None };
        assert_eq!(q.offset(), 0);
    }
}
