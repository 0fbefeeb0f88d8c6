pub mod github;
pub mod readme;

use serde::Serialize;

use crate::errors::AppError;
use github::{GitHubClient, RepoMetadata, RepoRef};
use readme::ReadmeDigest;

pub const METADATA_UNAVAILABLE: &str = "repository metadata unavailable";

/// Combined response of the summarizer endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub digest: ReadmeDigest,
    #[serde(flatten)]
    pub metadata: RepoMetadata,
    /// Parts of the response that degraded instead of failing the call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct Summarizer {
    github: GitHubClient,
}

impl Summarizer {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }

    /// Fetch README and metadata concurrently and join them.
    ///
    /// A missing README fails the call; metadata failures degrade to null
    /// fields plus a warning.
    pub async fn summarize(&self, repo: &RepoRef) -> Result<RepositorySummary, AppError> {
        let (readme, metadata) = tokio::join!(
            self.github.fetch_readme(repo),
            self.github.fetch_metadata(repo)
        );

        let mut warnings = Vec::new();
        let metadata = metadata.unwrap_or_else(|e| {
            tracing::warn!(repo = %repo, "repository metadata lookup failed: {:#}", e);
            warnings.push(METADATA_UNAVAILABLE.to_string());
            RepoMetadata::default()
        });

        let readme = readme?;
        let digest = readme::summarize(&readme);
        tracing::info!(
            repo = %repo,
            features = digest.key_features.len(),
            facts = digest.cool_facts.len(),
            "repository summarized"
        );

        Ok(RepositorySummary {
            digest,
            metadata,
            warnings,
        })
    }
}
