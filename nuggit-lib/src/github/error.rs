//! Failure taxonomy for the GitHub access layer.

use super::circuit_breaker::BreakerError;
use chrono::{DateTime, Utc};

/// Errors produced while talking to the GitHub REST API.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    /// The API refused the call because a quota is exhausted.
    #[error("GitHub rate limit hit (HTTP {status})")]
    RateLimited {
        status: u16,
        /// When the quota replenishes, if the response said so.
        reset_at: Option<DateTime<Utc>>,
    },

    /// A transient server-side failure (5xx).
    #[error("GitHub server error (HTTP {status})")]
    Server { status: u16 },

    /// The requested resource does not exist.
    #[error("resource not found")]
    NotFound,

    /// Any other non-success status.
    #[error("unexpected GitHub response (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response (connect failure, timeout, reset).
    #[error("request to GitHub failed")]
    Transport(#[source] reqwest::Error),

    /// The response body could not be decoded.
    #[error("could not decode GitHub response")]
    Decode(#[source] reqwest::Error),

    #[error(transparent)]
    Breaker(#[from] BreakerError),

    /// Every attempt failed with a retryable error.
    #[error("{label} failed after {attempts} attempt(s)")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: Box<Self>,
    },
}

/// How the retry engine treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Quota exhausted; wait for the reset when known.
    RateLimit { reset_at: Option<DateTime<Utc>> },

    /// Worth retrying with exponential backoff.
    Transient,

    /// Retrying cannot help.
    Terminal,
}

impl ErrorClass {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

impl GitHubError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { reset_at, .. } => ErrorClass::RateLimit { reset_at: *reset_at },
            Self::Server { .. } | Self::Transport(_) => ErrorClass::Transient,
            Self::NotFound | Self::Status { .. } | Self::Decode(_) | Self::Breaker(_) | Self::RetriesExhausted { .. } => {
                ErrorClass::Terminal
            }
        }
    }

    /// Returns `true` when this error, or the last cause of an exhausted retry
    /// sequence, is a 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns `true` for failures that may clear up on their own: retryable
    /// causes, exhausted retries, and an open or timed-out circuit breaker.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Breaker(_)) || self.class().is_retryable()
    }

    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. } | Self::Server { status } | Self::Status { status, .. } => Some(*status),
            Self::NotFound => Some(404),
            Self::Transport(e) | Self::Decode(e) => e.status().map(|s| s.as_u16()),
            Self::RetriesExhausted { source, .. } => source.status(),
            Self::Breaker(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = GitHubError::RateLimited { status: 403, reset_at: None };
        assert_eq!(err.class(), ErrorClass::RateLimit { reset_at: None });
        assert!(err.class().is_retryable());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            let err = GitHubError::Server { status };
            assert_eq!(err.class(), ErrorClass::Transient, "status {status}");
        }
    }

    #[test]
    fn test_not_found_is_terminal() {
        let err = GitHubError::NotFound;
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_other_status_is_terminal() {
        let err = GitHubError::Status {
            status: 422,
            message: "Unprocessable".into(),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.status(), Some(422));
    }

    #[test]
    fn test_exhausted_retries_keep_last_cause() {
        let err = GitHubError::RetriesExhausted {
            label: "get_repository(a/b)".into(),
            attempts: 4,
            source: Box::new(GitHubError::Server { status: 503 }),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "get_repository(a/b) failed after 4 attempt(s)");
    }

    #[test]
    fn test_breaker_errors_are_transient_but_not_retried() {
        let err: GitHubError = BreakerError::TimedOut {
            name: "x".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert!(err.is_transient());
    }
}
