//! Per-resource circuit breakers.
//!
//! A [`CircuitBreaker`] stops calling a dependency that keeps failing and lets a few
//! probe calls through once a cooldown has passed. Breakers are handed out by a
//! [`BreakerRegistry`], one per resource name, and live as long as the registry.

use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

const LOG_TARGET: &str = "   breaker";

/// Thresholds and timeouts governing a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,

    /// How long an open breaker waits before letting a probe call through.
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Consecutive successes needed to close a half-open breaker.
    pub success_threshold: u32,

    /// Upper bound on a single protected call; exceeding it counts as a failure.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            bail!("failure_threshold must be at least 1");
        }

        if self.success_threshold == 0 {
            bail!("success_threshold must be at least 1");
        }

        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }

        Ok(())
    }
}

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,

    /// Calls fail fast without reaching the dependency.
    Open,

    /// A limited number of probe calls are let through.
    HalfOpen,
}

/// Errors raised by the breaker itself rather than by the protected call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker '{name}' is open (last failure: {})", last_failure.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339()))]
    Open {
        name: String,
        last_failure: Option<DateTime<Utc>>,
    },

    #[error("call through circuit breaker '{name}' timed out after {timeout:?}")]
    TimedOut { name: String, timeout: Duration },
}

/// Counters kept by each breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,

    /// Calls refused while the breaker was open.
    pub rejected_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub circuit_opened_count: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl BreakerStats {
    /// Percentage of calls that succeeded, zero when nothing ran yet.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "request counts stay far below 2^52")]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 * 100.0 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    stats: BreakerStats,
    last_failure: Option<Instant>,
}

/// Failure tracker for one named resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().stats.state
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        self.lock().stats.clone()
    }

    /// Runs `op` under breaker protection.
    ///
    /// An open breaker whose recovery timeout has not elapsed refuses the call with
    /// [`BreakerError::Open`] and never invokes `op`. Otherwise `op` runs outside the
    /// lock, bounded by the configured timeout, and its outcome drives the state machine.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
    {
        self.admit()?;

        match tokio::time::timeout(self.config.timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(e)
            }
            Err(_elapsed) => {
                self.record_failure();
                Err(BreakerError::TimedOut {
                    name: self.name.clone(),
                    timeout: self.config.timeout,
                }
                .into())
            }
        }
    }

    /// Puts the breaker back into the closed state and clears its streaks.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.stats.state = CircuitState::Closed;
        state.stats.consecutive_failures = 0;
        state.stats.consecutive_successes = 0;
        state.last_failure = None;
        log::info!(target: LOG_TARGET, "Circuit breaker '{}' manually reset", self.name);
    }

    fn admit(&self) -> Result<(), BreakerError> {
        let mut state = self.lock();

        if state.stats.state == CircuitState::Open {
            let cooled_down = state.last_failure.is_none_or(|t| t.elapsed() >= self.config.recovery_timeout);
            if cooled_down {
                state.stats.state = CircuitState::HalfOpen;
                state.stats.consecutive_successes = 0;
                log::info!(target: LOG_TARGET, "Circuit breaker '{}' attempting recovery", self.name);
            } else {
                state.stats.total_requests += 1;
                state.stats.rejected_requests += 1;
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    last_failure: state.stats.last_failure_time,
                });
            }
        }

        Ok(())
    }

    fn record_success(&self) {
        let mut state = self.lock();
        let stats = &mut state.stats;

        stats.total_requests += 1;
        stats.successful_requests += 1;
        stats.consecutive_failures = 0;
        stats.consecutive_successes += 1;
        stats.last_success_time = Some(Utc::now());

        if stats.state == CircuitState::HalfOpen && stats.consecutive_successes >= self.config.success_threshold {
            stats.state = CircuitState::Closed;
            log::info!(target: LOG_TARGET, "Circuit breaker '{}' closed after recovery", self.name);
        }
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.last_failure = Some(Instant::now());

        let stats = &mut state.stats;
        stats.total_requests += 1;
        stats.failed_requests += 1;
        stats.consecutive_successes = 0;
        stats.consecutive_failures += 1;
        stats.last_failure_time = Some(Utc::now());

        match stats.state {
            CircuitState::Closed if stats.consecutive_failures >= self.config.failure_threshold => {
                stats.state = CircuitState::Open;
                stats.circuit_opened_count += 1;
                log::warn!(
                    target: LOG_TARGET,
                    "Circuit breaker '{}' opened after {} consecutive failure(s)",
                    self.name,
                    stats.consecutive_failures
                );
            }
            CircuitState::HalfOpen => {
                stats.state = CircuitState::Open;
                stats.circuit_opened_count += 1;
                log::warn!(target: LOG_TARGET, "Circuit breaker '{}' reopened during recovery attempt", self.name);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().expect("lock not poisoned")
    }
}

/// Hands out one breaker per resource name and keeps it for the registry's lifetime.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker for `name`, creating it with `config` on first use.
    ///
    /// The configuration of an existing breaker is left unchanged.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("lock not poisoned");
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(CircuitBreaker::new(name, config.clone()));
        let _ = breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().expect("lock not poisoned").get(name).cloned()
    }

    /// Stats for every breaker, keyed by name.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, BreakerStats> {
        let breakers: Vec<_> = self.breakers.lock().expect("lock not poisoned").values().cloned().collect();
        breakers.iter().map(|b| (b.name().to_string(), b.stats())).collect()
    }

    /// Manually closes the breaker for `name`. Returns `false` when no such breaker exists.
    pub fn reset(&self, name: &str) -> bool {
        self.get(name).is_some_and(|breaker| {
            breaker.reset();
            true
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.lock().expect("lock not poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
