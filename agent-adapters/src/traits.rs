//! Shared adapter traits and data structures.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by service adapters.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type shared by adapter implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Adapter is misconfigured or missing credentials.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target service.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, timeouts).
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned an error status or a malformed body.
    #[error("adapter response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl AdapterError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for response failures.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Raw verdict returned by a moderation service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Service-level verdict.
    pub flagged: bool,
    /// Per-category boolean verdicts.
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    /// Per-category scores in `[0, 1]`.
    #[serde(default, rename = "category_scores")]
    pub scores: BTreeMap<String, f64>,
}

impl Classification {
    /// Returns the highest category score, or `0.0` when no scores exist.
    #[must_use]
    pub fn max_score(&self) -> f64 {
        self.scores.values().copied().fold(0.0, f64::max)
    }
}

/// Trait implemented by moderation providers.
#[async_trait]
pub trait ModerationClient: Send + Sync {
    /// Returns the provider identifier (e.g., "openai").
    fn provider(&self) -> &'static str;

    /// Classifies `text` against the provider's unsafe-content categories.
    async fn classify(&self, text: &str) -> AdapterResult<Classification>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_score_defaults_to_zero() {
        assert_eq!(Classification::default().max_score(), 0.0);
    }

    #[test]
    fn max_score_picks_highest_category() {
        let classification = Classification {
            flagged: false,
            categories: BTreeMap::new(),
            scores: BTreeMap::from([("hate".to_owned(), 0.2), ("violence".to_owned(), 0.81)]),
        };
        assert_eq!(classification.max_score(), 0.81);
    }

    #[test]
    fn errors_render_context() {
        let err = AdapterError::transport("connection refused");
        assert_eq!(err.to_string(), "adapter transport error: connection refused");
    }
}
