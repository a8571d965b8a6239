//! Shared state for the GitHub access layer.

use super::circuit_breaker::{BreakerRegistry, BreakerStats};
use super::client::ApiClient;
use super::fetcher::{FetchConfig, RepositorySnapshotFetcher};
use super::rate_limit::{QuotaKind, QuotaSource, RateLimitTracker};
use super::retry::{ClientStats, ClientStatsSnapshot, RetryingClient, Sleeper, TokioSleeper};
use core::time::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Quota figures included in a [`StatsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitSummary {
    pub remaining: u64,
    pub limit: u64,
    pub reset_in_seconds: u64,
    pub utilization: f64,
}

/// Breaker counters plus the derived success rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSummary {
    #[serde(flatten)]
    pub stats: BreakerStats,
    pub success_rate: f64,
}

/// Everything the access layer exposes for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub client: ClientStatsSnapshot,
    pub rate_limit: Option<RateLimitSummary>,
    pub circuit_breakers: BTreeMap<String, BreakerSummary>,
}

/// Owns the rate-limit cache, the breaker registry, and the client counters.
///
/// Built once at startup and handed to everything that talks to GitHub. Tests build
/// their own so nothing leaks between them.
#[derive(Debug, Clone)]
pub struct ApiContext {
    tracker: Arc<RateLimitTracker>,
    breakers: Arc<BreakerRegistry>,
    stats: Arc<ClientStats>,
    sleeper: Arc<dyn Sleeper>,
}

impl ApiContext {
    #[must_use]
    pub fn new(quota_source: Arc<dyn QuotaSource>, refresh_interval: Duration) -> Self {
        Self {
            tracker: Arc::new(RateLimitTracker::new(quota_source, refresh_interval)),
            breakers: Arc::new(BreakerRegistry::new()),
            stats: Arc::new(ClientStats::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper used between retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub const fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    #[must_use]
    pub const fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn retrying_client(&self) -> RetryingClient {
        RetryingClient::new(Arc::clone(&self.tracker), Arc::clone(&self.stats), Arc::clone(&self.sleeper))
    }

    #[must_use]
    pub fn fetcher(&self, client: Arc<ApiClient>, config: FetchConfig) -> RepositorySnapshotFetcher {
        RepositorySnapshotFetcher::new(
            client,
            self.retrying_client(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.breakers),
            config,
        )
    }

    /// Collects client counters, the cached core quota, and every breaker's stats.
    ///
    /// Never triggers a quota refresh.
    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        let rate_limit = self.tracker.cached(QuotaKind::Core).await.map(|info| RateLimitSummary {
            remaining: info.remaining,
            limit: info.limit,
            reset_in_seconds: info.reset_in_seconds(),
            utilization: info.utilization(),
        });

        let circuit_breakers = self
            .breakers
            .all_stats()
            .into_iter()
            .map(|(name, stats)| {
                let success_rate = stats.success_rate();
                (name, BreakerSummary { stats, success_rate })
            })
            .collect();

        StatsSnapshot {
            client: self.stats.snapshot(),
            rate_limit,
            circuit_breakers,
        }
    }
}
