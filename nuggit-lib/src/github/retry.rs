//! Bounded retries around GitHub calls.

use super::backoff::{BackoffPolicy, RetryConfig};
use super::error::{ErrorClass, GitHubError};
use super::rate_limit::{QuotaKind, RateLimitTracker};
use async_trait::async_trait;
use chrono::Utc;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use serde::Serialize;
use std::sync::Arc;

const LOG_TARGET: &str = "     retry";

/// Where the retry engine goes to wait.
#[async_trait]
pub trait Sleeper: Send + Sync + core::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Running totals across every call made through a [`RetryingClient`].
#[derive(Debug, Default)]
pub struct ClientStats {
    requests_made: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rate_limit_hits: AtomicU64,
    retries_performed: AtomicU64,
    total_wait_ms: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClientStatsSnapshot {
    pub requests_made: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_hits: u64,
    pub retries_performed: u64,
    #[serde(with = "humantime_serde")]
    pub total_wait: Duration,
    pub success_rate: f64,
}

impl ClientStats {
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "request counts stay far below 2^52")]
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        let successful_requests = self.successful_requests.load(Ordering::Relaxed);
        let failed_requests = self.failed_requests.load(Ordering::Relaxed);
        let finished = successful_requests + failed_requests;

        ClientStatsSnapshot {
            requests_made: self.requests_made.load(Ordering::Relaxed),
            successful_requests,
            failed_requests,
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            retries_performed: self.retries_performed.load(Ordering::Relaxed),
            total_wait: Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed)),
            success_rate: if finished == 0 {
                0.0
            } else {
                successful_requests as f64 / finished as f64
            },
        }
    }

    fn add_wait(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self.total_wait_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs remote operations with rate-limit awareness and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    tracker: Arc<RateLimitTracker>,
    stats: Arc<ClientStats>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingClient {
    #[must_use]
    pub fn new(tracker: Arc<RateLimitTracker>, stats: Arc<ClientStats>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { tracker, stats, sleeper }
    }

    #[must_use]
    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    /// Invokes `op` until it succeeds, fails terminally, or `config.max_retries` retries are used up.
    ///
    /// Terminal failures are returned as-is after a single attempt. When every attempt fails
    /// with a retryable error, the last one is wrapped in [`GitHubError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(&self, label: &str, config: &RetryConfig, mut op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        let attempts = config.max_retries.saturating_add(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                self.wait_for_quota(attempt, config).await;
            }

            ClientStats::bump(&self.stats.requests_made);
            let error = match op().await {
                Ok(value) => {
                    ClientStats::bump(&self.stats.successful_requests);
                    if attempt > 0 {
                        log::info!(target: LOG_TARGET, "{label} succeeded after {attempt} retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            ClientStats::bump(&self.stats.failed_requests);

            let class = error.class();
            // `reported` is set when the response itself named the reset; only then may the
            // delay exceed `max_delay`.
            let (rate_limit_reset, reported) = match class {
                ErrorClass::RateLimit { reset_at: Some(at) } => {
                    ClientStats::bump(&self.stats.rate_limit_hits);
                    (Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO)), true)
                }
                ErrorClass::RateLimit { reset_at: None } => {
                    ClientStats::bump(&self.stats.rate_limit_hits);
                    (self.exhausted_core_reset().await, false)
                }
                ErrorClass::Transient => (None, false),
                ErrorClass::Terminal => {
                    log::debug!(target: LOG_TARGET, "{label} failed with a non-retryable error: {error}");
                    return Err(error);
                }
            };

            if attempt + 1 >= attempts {
                log::error!(target: LOG_TARGET, "{label} failed after {attempts} attempt(s): {error}");
                return Err(GitHubError::RetriesExhausted {
                    label: label.to_string(),
                    attempts,
                    source: Box::new(error),
                });
            }

            let mut delay = BackoffPolicy::delay(attempt, config, rate_limit_reset, &mut rand::rng());
            if !reported {
                delay = delay.min(config.max_delay);
            }
            log::warn!(
                target: LOG_TARGET,
                "{label} failed (attempt {}/{attempts}): {error}. Retrying in {:.1}s",
                attempt + 1,
                delay.as_secs_f64()
            );

            self.sleeper.sleep(delay).await;
            ClientStats::bump(&self.stats.retries_performed);
            self.stats.add_wait(delay);

            if matches!(class, ErrorClass::RateLimit { .. }) {
                let _ = self.tracker.force_refresh(QuotaKind::Core).await;
            }
        }

        unreachable!("the final attempt always returns")
    }

    /// Time until the cached core quota resets, when that quota is known to be used up.
    ///
    /// A rate-limit response without a reset (a secondary limit) says nothing about the
    /// core quota, so an unexhausted core quota yields `None` and plain backoff applies.
    async fn exhausted_core_reset(&self) -> Option<Duration> {
        let info = self.tracker.cached(QuotaKind::Core).await?;
        info.is_exhausted().then(|| info.reset_in(Utc::now()))
    }

    /// Before a retry, waits out an exhausted core quota when one is already cached.
    ///
    /// Skips the check entirely when nothing has been cached yet, so the tracker is
    /// never consulted on the common path.
    async fn wait_for_quota(&self, attempt: u32, config: &RetryConfig) {
        if !self.tracker.has_cached().await {
            return;
        }

        let info = self.tracker.get_info(QuotaKind::Core).await;
        let now = Utc::now();
        if !info.is_exhausted() || info.reset_time <= now {
            return;
        }

        let delay = BackoffPolicy::delay(attempt, config, Some(info.reset_in(now)), &mut rand::rng());
        log::warn!(
            target: LOG_TARGET,
            "GitHub rate limit exhausted, waiting {:.1}s until reset",
            delay.as_secs_f64()
        );

        self.sleeper.sleep(delay).await;
        self.stats.add_wait(delay);
        let _ = self.tracker.force_refresh(QuotaKind::Core).await;
    }
}
