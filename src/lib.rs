//! keygate: API key issuance and validation, plus the GitHub repository
//! summarizer that those keys unlock.
//!
//! The binary in `main.rs` wires these modules to a PostgreSQL store; the
//! integration tests in `tests/` wire them to `MemoryStore`.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod store;
pub mod summarizer;

use keys::KeyManager;
use middleware::rate_limit::KeyValidator;
use store::Store;
use summarizer::{github::GitHubClient, Summarizer};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub keys: KeyManager,
    pub validator: KeyValidator,
    pub summarizer: Summarizer,
    pub config: config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: config::Config) -> anyhow::Result<Self> {
        let github = GitHubClient::from_config(&config)?;
        Ok(Self {
            keys: KeyManager::new(store.clone(), config.default_rate_limit, config.key_prefix.clone()),
            validator: KeyValidator::new(store.clone()),
            summarizer: Summarizer::new(github),
            store,
            config,
        })
    }
}
