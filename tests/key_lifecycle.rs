//! Key lifecycle and rate limiting against the in-memory store.
//!
//! `MemoryStore` enforces the same check-and-increment guarantee as the
//! PostgreSQL store, so these run without a database:
//! `cargo test --test key_lifecycle`

use std::sync::Arc;

use keygate::errors::AppError;
use keygate::keys::{secret, CreateKey, KeyManager, UpdateKey};
use keygate::middleware::rate_limit::KeyValidator;
use keygate::models::api_key::{KeyType, NewApiKey};
use keygate::models::user::NewUser;
use keygate::store::{memory::MemoryStore, Store};
use uuid::Uuid;

async fn user(store: &MemoryStore, email: &str) -> Uuid {
    store
        .insert_user(&NewUser {
            email: email.into(),
            name: None,
            avatar_url: None,
            provider: "google".into(),
            provider_id: None,
        })
        .await
        .unwrap()
        .id
}

fn setup(rate_limit: i64) -> (MemoryStore, KeyManager, KeyValidator) {
    let store = MemoryStore::new();
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    (
        store,
        KeyManager::new(shared.clone(), rate_limit, "ak_"),
        KeyValidator::new(shared),
    )
}

fn dev_key(name: &str) -> CreateKey {
    CreateKey {
        name: Some(name.into()),
        key_type: Some("dev".into()),
        ..Default::default()
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_returns_secret_once_and_stores_hash() {
        let (store, keys, _) = setup(200);
        let owner = user(&store, "ada@example.com").await;

        let created = keys.create(owner, dev_key("ci")).await.unwrap();
        assert!(created.secret.starts_with("ak_"));
        assert_eq!(created.key.usage, 0);
        assert_eq!(created.key.rate_limit, 200);
        assert_eq!(created.key.key_type, KeyType::Dev);
        assert_eq!(created.key.key_hash, secret::hash(&created.secret));

        let fetched = keys.get(owner, created.key.id).await.unwrap();
        assert!(!fetched.masked().contains(&created.secret));
    }

    #[tokio::test]
    async fn test_create_requires_name_and_valid_type() {
        let (store, keys, _) = setup(200);
        let owner = user(&store, "ada@example.com").await;

        let missing = keys
            .create(owner, CreateKey { name: Some("x".into()), ..Default::default() })
            .await;
        assert!(matches!(missing, Err(AppError::Validation(_))));

        let blank = keys.create(owner, dev_key("   ")).await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let bad_type = keys
            .create(
                owner,
                CreateKey {
                    name: Some("x".into()),
                    key_type: Some("staging".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad_type, Err(AppError::Validation(_))));

        let bad_ttl = keys
            .create(owner, CreateKey { ttl_secs: Some(0), ..dev_key("x") })
            .await;
        assert!(matches!(bad_ttl, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_huge_ttl_is_rejected_not_overflowed() {
        let (store, keys, _) = setup(200);
        let owner = user(&store, "ada@example.com").await;

        for ttl in [9_000_000_000_000, i64::MAX] {
            match keys
                .create(owner, CreateKey { ttl_secs: Some(ttl), ..dev_key("far") })
                .await
            {
                Err(AppError::Validation(msg)) => assert_eq!(msg, "expiresIn is out of range"),
                other => panic!("expected validation error for {}, got {:?}", ttl, other.map(|k| k.key.id)),
            }
        }

        let (page, _) = keys.list(owner, None, None, None).await.unwrap();
        assert_eq!(page.total, 0);

        let created = keys
            .create(owner, CreateKey { ttl_secs: Some(86_400), ..dev_key("day") })
            .await
            .unwrap();
        assert!(created.key.expires_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_sign_in_creates_one_user() {
        let store = MemoryStore::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { user(&store, "ada@example.com").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(
            store.find_user_by_email("ada@example.com").await.unwrap().map(|u| u.id),
            Some(ids[0])
        );
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter_and_pages() {
        let (store, keys, _) = setup(200);
        let owner = user(&store, "ada@example.com").await;

        for i in 0..3 {
            keys.create(owner, dev_key(&format!("dev-{}", i))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        keys.create(
            owner,
            CreateKey { key_type: Some("prod".into()), ..dev_key("prod-0") },
        )
        .await
        .unwrap();

        let (page, query) = keys.list(owner, None, None, None).await.unwrap();
        assert_eq!((query.page, query.limit), (1, 10));
        assert_eq!(page.total, 4);
        assert_eq!(page.keys[0].name, "prod-0");
        assert_eq!(page.keys[3].name, "dev-0");

        let (page, _) = keys.list(owner, Some(2), Some(2), Some("dev")).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.keys.len(), 1);
        assert_eq!(page.keys[0].name, "dev-0");

        assert!(matches!(
            keys.list(owner, Some(0), None, None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            keys.list(owner, None, Some(101), None).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_are_owner_scoped() {
        let (store, keys, _) = setup(200);
        let ada = user(&store, "ada@example.com").await;
        let bob = user(&store, "bob@example.com").await;
        let key = keys.create(ada, dev_key("ci")).await.unwrap().key;

        let rename = UpdateKey { name: Some("renamed".into()), ..Default::default() };
        assert!(matches!(
            keys.update(bob, key.id, rename.clone()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(keys.get(bob, key.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(keys.delete(bob, key.id).await, Err(AppError::NotFound(_))));

        let updated = keys.update(ada, key.id, rename).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.key_type, KeyType::Dev);

        assert!(matches!(
            keys.update(ada, key.id, UpdateKey::default()).await,
            Err(AppError::Validation(_))
        ));

        tokio_test::assert_ok!(keys.delete(ada, key.id).await);
        tokio_test::assert_err!(keys.delete(ada, key.id).await);
    }
}

mod rate_limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_admit_increments_until_limit() {
        let (store, keys, validator) = setup(3);
        let owner = user(&store, "ada@example.com").await;
        let created = keys.create(owner, dev_key("ci")).await.unwrap();

        for expected in 1..=3 {
            let key = validator.admit(&created.secret, None).await.unwrap();
            assert_eq!(key.usage, expected);
        }

        assert!(matches!(
            validator.admit(&created.secret, None).await,
            Err(AppError::RateLimitExceeded)
        ));
        // The rejected attempt must not move the counter.
        let key = keys.get(owner, created.key.id).await.unwrap();
        assert_eq!(key.usage, 3);
        assert!(matches!(
            validator.inspect(&created.secret, Some(owner)).await,
            Err(AppError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn test_unknown_empty_and_foreign_keys_are_unauthorized() {
        let (store, keys, validator) = setup(10);
        let ada = user(&store, "ada@example.com").await;
        let bob = user(&store, "bob@example.com").await;
        let created = keys.create(ada, dev_key("ci")).await.unwrap();

        assert!(matches!(validator.admit("", None).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(
            validator.admit("ak_doesnotexist", None).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            validator.admit(&created.secret, Some(bob)).await,
            Err(AppError::Unauthorized(_))
        ));
        assert_eq!(keys.get(ada, created.key.id).await.unwrap().usage, 0);
    }

    #[tokio::test]
    async fn test_expired_key_is_rejected_without_charge() {
        let (store, _, validator) = setup(10);
        let owner = user(&store, "ada@example.com").await;

        let generated = secret::generate("ak_");
        let key = store
            .insert_key(&NewApiKey {
                id: Uuid::new_v4(),
                user_id: owner,
                name: "old".into(),
                description: None,
                key_hash: generated.hash.clone(),
                key_prefix: generated.display_prefix.clone(),
                key_type: KeyType::Prod,
                rate_limit: 10,
                expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
            })
            .await
            .unwrap();

        match validator.admit(&generated.plaintext, None).await {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "API key has expired"),
            other => panic!("expected expiry rejection, got {:?}", other.map(|k| k.id)),
        }
        assert_eq!(store.get_key(owner, key.id).await.unwrap().unwrap().usage, 0);
    }

    #[tokio::test]
    async fn test_reset_usage_restores_access() {
        let (store, keys, validator) = setup(1);
        let owner = user(&store, "ada@example.com").await;
        let created = keys.create(owner, dev_key("ci")).await.unwrap();

        tokio_test::assert_ok!(validator.admit(&created.secret, None).await);
        tokio_test::assert_err!(validator.admit(&created.secret, None).await);

        keys.reset_usage(created.key.id).await.unwrap();
        tokio_test::assert_ok!(validator.admit(&created.secret, None).await);

        assert!(matches!(
            keys.reset_usage(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admits_never_exceed_limit() {
        let (store, keys, validator) = setup(5);
        let owner = user(&store, "ada@example.com").await;
        let created = keys.create(owner, dev_key("ci")).await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let validator = validator.clone();
                let secret = created.secret.clone();
                tokio::spawn(async move { validator.admit(&secret, None).await })
            })
            .collect();

        let mut admitted = 0;
        let mut limited = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(AppError::RateLimitExceeded) => limited += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(limited, 27);
        assert_eq!(keys.get(owner, created.key.id).await.unwrap().usage, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_unit_goes_to_exactly_one_caller() {
        let (store, keys, validator) = setup(10);
        let owner = user(&store, "ada@example.com").await;
        let created = keys.create(owner, dev_key("ci")).await.unwrap();
        for _ in 0..9 {
            validator.admit(&created.secret, None).await.unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let validator = validator.clone();
                let secret = created.secret.clone();
                tokio::spawn(async move { validator.admit(&secret, None).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(keys.get(owner, created.key.id).await.unwrap().usage, 10);
    }
}
