//! Retry delay computation.

use crate::Result;
use core::time::Duration;
use ohno::bail;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest pad added on top of a known rate-limit reset.
const RESET_PAD_MIN: Duration = Duration::from_secs(1);

/// Largest pad added on top of a known rate-limit reset.
const RESET_PAD_MAX: Duration = Duration::from_secs(5);

/// How many times, and how patiently, a remote call is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt, so `max_retries + 1` attempts in total.
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub exponential_base: f64,

    /// Scale exponential delays by a random factor in `[0.5, 1.5]`.
    pub jitter: bool,

    /// Wait for a known rate-limit reset instead of guessing.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            exponential_base: 2.0,
            jitter: true,
            respect_retry_after: true,
        }
    }
}

impl RetryConfig {
    /// Preset for lower-priority secondary calls such as commit or contributor counts.
    #[must_use]
    pub fn secondary() -> Self {
        Self {
            max_retries: 3,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            bail!("exponential_base must be at least 1.0, got {}", self.exponential_base);
        }

        if self.base_delay > self.max_delay {
            bail!(
                "base_delay ({:?}) must not exceed max_delay ({:?})",
                self.base_delay,
                self.max_delay
            );
        }

        Ok(())
    }
}

/// Computes how long to wait before the next attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffPolicy;

impl BackoffPolicy {
    /// Returns the delay to apply after the failed attempt number `attempt` (0-based).
    ///
    /// With a known `rate_limit_reset` and `respect_retry_after`, the delay is the reset
    /// plus a pad of one to five seconds and is never less than the reset. Otherwise it is
    /// `base_delay * exponential_base^attempt`, optionally jittered, capped at `max_delay`.
    pub fn delay<R: Rng + ?Sized>(
        attempt: u32,
        config: &RetryConfig,
        rate_limit_reset: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if config.respect_retry_after {
            if let Some(reset) = rate_limit_reset {
                let pad = rng.random_range(RESET_PAD_MIN..=RESET_PAD_MAX);
                return (reset + pad).min(config.max_delay.max(reset));
            }
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut secs = config.base_delay.as_secs_f64() * config.exponential_base.powi(exponent);
        if config.jitter {
            secs *= rng.random_range(0.5..=1.5);
        }

        let max = config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            config.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}
