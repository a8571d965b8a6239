//! Cached view of the GitHub API quotas.
//!
//! [`RateLimitTracker`] remembers the most recent quota for each [`QuotaKind`] and only
//! asks the remote status endpoint again once the refresh interval has elapsed, unless
//! a refresh is forced. The tracker never fails a calling operation: when the status
//! endpoint cannot be reached it assumes a full quota.

use super::error::GitHubError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

const LOG_TARGET: &str = "rate_limit";

/// Refresh interval used when none is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Reset window assumed when the real one is unknown.
const DEFAULT_RESET_WINDOW: chrono::Duration = chrono::Duration::hours(1);

/// The separate quotas GitHub tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Core,
    Search,
    Graphql,
}

impl QuotaKind {
    const fn default_limit(self) -> u64 {
        match self {
            Self::Core | Self::Graphql => 5000,
            Self::Search => 30,
        }
    }
}

/// A point-in-time copy of one quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    pub used: u64,
}

impl RateLimitInfo {
    /// A full quota that resets an hour from `now`.
    #[must_use]
    pub fn full(kind: QuotaKind, now: DateTime<Utc>) -> Self {
        let limit = kind.default_limit();
        Self {
            limit,
            remaining: limit,
            reset_time: now + DEFAULT_RESET_WINDOW,
            used: 0,
        }
    }

    /// Time left until the quota replenishes, zero when the reset is in the past.
    #[must_use]
    pub fn reset_in(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_time - now).to_std().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn reset_in_seconds(&self) -> u64 {
        self.reset_in(Utc::now()).as_secs()
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Fraction of the quota already consumed.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "quota values are small")]
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.used as f64 / self.limit as f64
        }
    }
}

/// Something that can report the current quotas, typically `GET /rate_limit`.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn fetch_quotas(&self) -> Result<Vec<(QuotaKind, RateLimitInfo)>, GitHubError>;
}

#[derive(Debug, Default)]
struct TrackerState {
    cache: HashMap<QuotaKind, RateLimitInfo>,
    last_check: Option<Instant>,
}

/// Caches quota information per [`QuotaKind`].
pub struct RateLimitTracker {
    source: Arc<dyn QuotaSource>,
    refresh_interval: Duration,
    state: Mutex<TrackerState>,
}

impl core::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("source", &"<dyn QuotaSource>")
            .field("refresh_interval", &self.refresh_interval)
            .field("state", &self.state)
            .finish()
    }
}

impl RateLimitTracker {
    #[must_use]
    pub fn new(source: Arc<dyn QuotaSource>, refresh_interval: Duration) -> Self {
        Self {
            source,
            refresh_interval,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Returns the quota for `kind`, refreshing first if the cache is stale.
    pub async fn get_info(&self, kind: QuotaKind) -> RateLimitInfo {
        let mut state = self.state.lock().await;
        if !self.is_fresh(&state) || !state.cache.contains_key(&kind) {
            self.refresh_locked(&mut state).await;
        }

        *state.cache.entry(kind).or_insert_with(|| RateLimitInfo::full(kind, Utc::now()))
    }

    /// Returns the quota for `kind` after an unconditional refresh.
    ///
    /// Used right after a rate-limit response, to learn the authoritative reset time.
    pub async fn force_refresh(&self, kind: QuotaKind) -> RateLimitInfo {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
        *state.cache.entry(kind).or_insert_with(|| RateLimitInfo::full(kind, Utc::now()))
    }

    /// Queries the quota source unless the cache is still fresh and `force` is not set.
    pub async fn refresh(&self, force: bool) {
        let mut state = self.state.lock().await;
        if force || !self.is_fresh(&state) {
            self.refresh_locked(&mut state).await;
        }
    }

    fn is_fresh(&self, state: &TrackerState) -> bool {
        state.last_check.is_some_and(|t| t.elapsed() < self.refresh_interval)
    }

    async fn refresh_locked(&self, state: &mut TrackerState) {
        let now = Utc::now();
        match self.source.fetch_quotas().await {
            Ok(quotas) => {
                for (kind, info) in quotas {
                    let _ = state.cache.insert(kind, info);
                }
            }
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Could not refresh rate limit information, assuming full quota: {e:#}");
                for kind in [QuotaKind::Core, QuotaKind::Search, QuotaKind::Graphql] {
                    let _ = state.cache.entry(kind).or_insert_with(|| RateLimitInfo::full(kind, now));
                }
            }
        }

        // A broken status endpoint is polled at most once per interval too.
        state.last_check = Some(Instant::now());
    }

    /// Returns the cached quota for `kind` without touching the network.
    pub async fn cached(&self, kind: QuotaKind) -> Option<RateLimitInfo> {
        self.state.lock().await.cache.get(&kind).copied()
    }

    /// Returns `true` once any quota has been cached.
    pub async fn has_cached(&self) -> bool {
        !self.state.lock().await.cache.is_empty()
    }

    /// Records a quota observed in response headers.
    pub async fn observe(&self, kind: QuotaKind, info: RateLimitInfo) {
        let _ = self.state.lock().await.cache.insert(kind, info);
    }
}
