/// HTTP client for the GitHub REST API and raw content host.
/// Every request is bounded by the configured timeout; there are no retries.
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::AppError;

static OWNER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());
static REPO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// Branches probed for a README, in order.
const README_BRANCHES: [&str; 2] = ["main", "master"];

/// `owner/name` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Accepts `https://github.com/<owner>/<repo>` with an optional trailing
    /// slash or `.git` suffix.
    pub fn parse(repository_url: &str) -> Result<Self, AppError> {
        let invalid = || {
            AppError::Validation(
                "Invalid GitHub URL. Please provide a valid GitHub repository URL \
                 (e.g., https://github.com/username/repository)"
                    .into(),
            )
        };

        let url = url::Url::parse(repository_url.trim()).map_err(|_| invalid())?;
        if url.scheme() != "https" || url.host_str() != Some("github.com") {
            return Err(invalid());
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid());
        }

        let segments: Vec<&str> = url
            .path()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let &[owner, name] = segments.as_slice() else {
            return Err(invalid());
        };
        let name = name.strip_suffix(".git").unwrap_or(name);

        if !OWNER_RE.is_match(owner) || !REPO_RE.is_match(name) || name.chars().all(|c| c == '.') {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Repository facts shown next to the README digest. All fields are `None`
/// when the metadata lookup fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub stars: Option<u64>,
    pub latest_version: Option<String>,
    pub website: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    stargazers_count: Option<u64>,
    homepage: Option<String>,
    license: Option<LicenseInfo>,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LicenseInfo {
    spdx_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    raw_url: String,
}

impl GitHubClient {
    pub fn new(
        api_url: &str,
        raw_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("keygate-summarizer"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            raw_url: raw_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(
            &cfg.github_api_url,
            &cfg.github_raw_url,
            cfg.github_token.as_deref(),
            Duration::from_secs(cfg.fetch_timeout_secs.max(1)),
        )
    }

    /// Raw README from `main`, falling back to `master`.
    pub async fn fetch_readme(&self, repo: &RepoRef) -> Result<String, AppError> {
        for branch in README_BRANCHES {
            let url = format!(
                "{}/{}/{}/{}/README.md",
                self.raw_url, repo.owner, repo.name, branch
            );
            let resp = self.client.get(&url).send().await.map_err(|e| {
                tracing::warn!(repo = %repo, branch, "README request failed: {}", e);
                AppError::Upstream(format!("failed to fetch README: {}", e))
            })?;

            if resp.status().is_success() {
                return resp
                    .text()
                    .await
                    .map_err(|e| AppError::Upstream(format!("failed to read README body: {}", e)));
            }
            tracing::debug!(repo = %repo, branch, status = %resp.status(), "README not on branch");
        }

        Err(AppError::NotFound(
            "README not found in main or master branch".into(),
        ))
    }

    /// Stars, homepage, license and a version string.
    /// Version falls back from latest release → newest tag → default branch.
    pub async fn fetch_metadata(&self, repo: &RepoRef) -> anyhow::Result<RepoMetadata> {
        let info: RepoInfo = self
            .client
            .get(format!("{}/repos/{}/{}", self.api_url, repo.owner, repo.name))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let latest_version = match self.latest_release(repo).await {
            Some(tag) => Some(tag),
            None => match self.newest_tag(repo).await {
                Some(tag) => Some(tag),
                None => info.default_branch.clone(),
            },
        };

        let license = info.license.and_then(|l| {
            l.spdx_id
                .filter(|id| !id.is_empty() && id != "NOASSERTION")
                .or(l.name)
        });

        Ok(RepoMetadata {
            stars: info.stargazers_count,
            latest_version,
            website: info.homepage.filter(|h| !h.trim().is_empty()),
            license,
        })
    }

    async fn latest_release(&self, repo: &RepoRef) -> Option<String> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_url, repo.owner, repo.name
        );
        match self.get_json::<Release>(&url).await {
            Ok(release) => Some(release.tag_name),
            Err(e) => {
                tracing::debug!(repo = %repo, "no latest release: {}", e);
                None
            }
        }
    }

    async fn newest_tag(&self, repo: &RepoRef) -> Option<String> {
        let url = format!(
            "{}/repos/{}/{}/tags?per_page=1",
            self.api_url, repo.owner, repo.name
        );
        match self.get_json::<Vec<Tag>>(&url).await {
            Ok(tags) => tags.into_iter().next().map(|t| t.name),
            Err(e) => {
                tracing::debug!(repo = %repo, "no tags: {}", e);
                None
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
