//! Rate-limit aware, circuit-breaking access to the GitHub REST API.
//!
//! # Implementation Model
//!
//! Leaf components first:
//!
//! - [`RateLimitTracker`] caches GitHub's quotas and refreshes them at most once per
//!   interval. It never fails a caller; an unreachable status endpoint means "assume full".
//! - [`BackoffPolicy`] computes retry delays. It is pure so it can be tested exhaustively.
//! - [`CircuitBreaker`] fails fast for a resource that keeps failing, and probes recovery
//!   after a cooldown. [`BreakerRegistry`] hands out one breaker per resource name.
//! - [`RetryingClient`] runs an operation with bounded retries, classifying each failure
//!   as rate-limit, transient, or terminal.
//! - [`RepositorySnapshotFetcher`] combines the above to produce a [`RepositoryRecord`].
//!
//! All shared state lives in an [`ApiContext`] built once at startup.
//!
//! [`RepositoryRecord`]: crate::record::RepositoryRecord

mod backoff;
mod circuit_breaker;
mod client;
mod context;
mod error;
mod fetcher;
mod rate_limit;
mod retry;

pub use backoff::{BackoffPolicy, RetryConfig};
pub use circuit_breaker::{BreakerError, BreakerRegistry, BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{ApiClient, ApiResponse, DEFAULT_API_URL};
pub use context::{ApiContext, BreakerSummary, RateLimitSummary, StatsSnapshot};
pub use error::{ErrorClass, GitHubError};
pub use fetcher::{FetchConfig, FetchOutcome, RepositorySnapshotFetcher};
pub use rate_limit::{DEFAULT_REFRESH_INTERVAL, QuotaKind, QuotaSource, RateLimitInfo, RateLimitTracker};
pub use retry::{ClientStats, ClientStatsSnapshot, RetryingClient, Sleeper, TokioSleeper};
