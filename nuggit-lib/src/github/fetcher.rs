//! Assembles a [`RepositoryRecord`] from several GitHub calls.
//!
//! The primary `GET /repos/{owner}/{name}` call runs through the repository's circuit
//! breaker and the retry engine, and its failure is the only one reported to the
//! caller. Secondary attributes (contributors, commits, latest release, topics, license)
//! are fetched concurrently with a lighter retry policy and fall back to a fixed value
//! when they cannot be retrieved.

use super::backoff::RetryConfig;
use super::circuit_breaker::{BreakerRegistry, CircuitBreakerConfig};
use super::client::{ApiClient, ApiResponse, LicenseContent, Release, Repository, Topics};
use super::error::GitHubError;
use super::rate_limit::RateLimitTracker;
use super::retry::RetryingClient;
use crate::RepoId;
use crate::record::{ContributorCount, RepositoryRecord};
use crate::timestamp::to_utc_iso;
use serde::de::DeserializeOwned;
use std::sync::Arc;

const LOG_TARGET: &str = "     fetch";

/// Retry and breaker settings used by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Policy for the primary repository call.
    pub retry: RetryConfig,

    /// Policy for secondary attribute calls.
    pub secondary_retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            secondary_retry: RetryConfig::secondary(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Result of fetching one repository.
#[derive(Debug)]
pub enum FetchOutcome {
    Found(Box<RepositoryRecord>),

    /// GitHub has no such repository.
    NotFound,

    /// A failure that may clear up later: exhausted retries or an open breaker.
    Transient(GitHubError),

    /// A failure that will not go away by asking again.
    Terminal(GitHubError),
}

impl FetchOutcome {
    /// Collapses the outcome into the `Result<Option<_>>` shape.
    pub fn into_result(self) -> Result<Option<RepositoryRecord>, GitHubError> {
        match self {
            Self::Found(record) => Ok(Some(*record)),
            Self::NotFound => Ok(None),
            Self::Transient(e) | Self::Terminal(e) => Err(e),
        }
    }

    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Fetches normalized repository snapshots.
#[derive(Debug, Clone)]
pub struct RepositorySnapshotFetcher {
    client: Arc<ApiClient>,
    retry: RetryingClient,
    tracker: Arc<RateLimitTracker>,
    breakers: Arc<BreakerRegistry>,
    config: FetchConfig,
}

impl RepositorySnapshotFetcher {
    #[must_use]
    pub fn new(
        client: Arc<ApiClient>,
        retry: RetryingClient,
        tracker: Arc<RateLimitTracker>,
        breakers: Arc<BreakerRegistry>,
        config: FetchConfig,
    ) -> Self {
        Self {
            client,
            retry,
            tracker,
            breakers,
            config,
        }
    }

    /// Name of the breaker guarding the primary call for `id`.
    #[must_use]
    pub fn breaker_name(id: &RepoId) -> String {
        format!("github_get_repo_{id}")
    }

    /// Fetches a snapshot of `id`.
    pub async fn fetch(&self, id: &RepoId) -> FetchOutcome {
        log::info!(target: LOG_TARGET, "Querying GitHub for information on repository '{id}'");

        match self.fetch_primary(id).await {
            Ok(Some(repo)) => FetchOutcome::Found(Box::new(self.assemble(id, repo).await)),
            Ok(None) => {
                log::info!(target: LOG_TARGET, "Repository '{id}' not found");
                FetchOutcome::NotFound
            }
            Err(e) if e.is_transient() => FetchOutcome::Transient(e),
            Err(e) => FetchOutcome::Terminal(e),
        }
    }

    async fn fetch_primary(&self, id: &RepoId) -> Result<Option<Repository>, GitHubError> {
        let breaker = self.breakers.get_or_create(&Self::breaker_name(id), &self.config.circuit_breaker);
        let label = format!("get_repository({id})");
        let path = format!("/repos/{id}");

        breaker
            .call(|| async {
                match self.get_json::<Repository>(&label, &self.config.retry, &path).await {
                    Ok(repo) => Ok(Some(repo)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn assemble(&self, id: &RepoId, repo: Repository) -> RepositoryRecord {
        let Repository {
            name,
            description,
            html_url,
            topics,
            license,
            created_at,
            updated_at,
            pushed_at,
            stargazers_count,
            forks_count,
            open_issues_count,
            ..
        } = repo;

        let (contributors, commits, latest_release, topics, license) = tokio::join!(
            self.contributors(id),
            self.commits(id),
            self.latest_release(id),
            self.topics(id, topics),
            self.license(id, license.and_then(|l| l.display_name())),
        );

        let normalize = |ts: Option<String>| ts.as_deref().and_then(to_utc_iso);

        RepositoryRecord {
            name,
            description: description.unwrap_or_default(),
            url: html_url,
            topics,
            license,
            created_at: normalize(created_at),
            updated_at: normalize(updated_at),
            pushed_at: normalize(pushed_at),
            stars: stargazers_count,
            forks: forks_count,
            open_issues: open_issues_count,
            contributors,
            commits,
            latest_release,
            ..RepositoryRecord::new(id.clone())
        }
    }

    async fn contributors(&self, id: &RepoId) -> ContributorCount {
        let path = format!("/repos/{id}/contributors?per_page=1&anon=true");
        match self.count(&format!("get_contributors({id})"), &path).await {
            Ok(n) => ContributorCount::Exact(n),
            Err(e) => {
                let fallback = ContributorCount::capped();
                log::debug!(target: LOG_TARGET, "Could not count contributors for '{id}', using {fallback}: {e}");
                fallback
            }
        }
    }

    async fn commits(&self, id: &RepoId) -> u64 {
        let path = format!("/repos/{id}/commits?per_page=1");
        match self.count(&format!("get_commits({id})"), &path).await {
            Ok(n) => n,
            Err(e) if e.status() == Some(409) => {
                log::debug!(target: LOG_TARGET, "Repository '{id}' is empty");
                0
            }
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Could not count commits for '{id}', using 0: {e}");
                0
            }
        }
    }

    async fn latest_release(&self, id: &RepoId) -> Option<String> {
        let path = format!("/repos/{id}/releases/latest");
        match self.get_json::<Release>(&format!("get_latest_release({id})"), &self.config.secondary_retry, &path).await {
            Ok(release) => Some(release.tag_name),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Could not get latest release for '{id}': {e}");
                None
            }
        }
    }

    async fn topics(&self, id: &RepoId, embedded: Option<Vec<String>>) -> Vec<String> {
        if let Some(topics) = embedded {
            return topics;
        }

        let path = format!("/repos/{id}/topics");
        match self.get_json::<Topics>(&format!("get_topics({id})"), &self.config.secondary_retry, &path).await {
            Ok(topics) => topics.names,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Could not get topics for '{id}': {e}");
                Vec::new()
            }
        }
    }

    async fn license(&self, id: &RepoId, embedded: Option<String>) -> Option<String> {
        if embedded.is_some() {
            return embedded;
        }

        let path = format!("/repos/{id}/license");
        match self.get_json::<LicenseContent>(&format!("get_license({id})"), &self.config.secondary_retry, &path).await {
            Ok(content) => content.license.and_then(|l| l.display_name()),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Could not get license for '{id}': {e}");
                None
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, label: &str, config: &RetryConfig, path: &str) -> Result<T, GitHubError> {
        let resp = self.retry.execute(label, config, || self.client.get_json::<T>(path)).await?;
        Ok(self.observe(resp).await)
    }

    async fn count(&self, label: &str, path: &str) -> Result<u64, GitHubError> {
        let resp = self
            .retry
            .execute(label, &self.config.secondary_retry, || self.client.count_items(path))
            .await?;
        Ok(self.observe(resp).await)
    }

    async fn observe<T>(&self, resp: ApiResponse<T>) -> T {
        if let Some((kind, info)) = resp.quota {
            self.tracker.observe(kind, info).await;
        }
        resp.value
    }
}
