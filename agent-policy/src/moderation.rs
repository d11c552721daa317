//! Moderation verdicts returned by the safety gate.

use std::collections::BTreeMap;

use agent_telemetry::{CaptureError, RenderedOutput, TraceOutput, render_serialized};
use serde::{Deserialize, Serialize};

/// Outcome of one safety-gate check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
    #[serde(default)]
    category_scores: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl ModerationResult {
    /// Returns an unflagged result with no categories and no reason.
    #[must_use]
    pub fn unflagged() -> Self {
        Self::default()
    }

    /// Returns an unflagged result explaining why the check was skipped.
    #[must_use]
    pub fn unchecked(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Creates a result from its parts.
    #[must_use]
    pub fn new(
        flagged: bool,
        categories: BTreeMap<String, bool>,
        category_scores: BTreeMap<String, f64>,
        reason: Option<String>,
    ) -> Self {
        Self {
            flagged,
            categories,
            category_scores,
            reason,
        }
    }

    /// Returns true when the content must not pass.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Returns the per-category verdicts.
    #[must_use]
    pub fn categories(&self) -> &BTreeMap<String, bool> {
        &self.categories
    }

    /// Returns the per-category scores.
    #[must_use]
    pub fn category_scores(&self) -> &BTreeMap<String, f64> {
        &self.category_scores
    }

    /// Returns the explanation, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl TraceOutput for ModerationResult {
    fn render(&self) -> Result<Option<RenderedOutput>, CaptureError> {
        render_serialized(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflagged_is_empty() {
        let result = ModerationResult::unflagged();
        assert!(!result.is_flagged());
        assert!(result.categories().is_empty());
        assert!(result.category_scores().is_empty());
        assert_eq!(result.reason(), None);
    }

    #[test]
    fn serializes_without_missing_reason() {
        let json = serde_json::to_value(ModerationResult::unflagged()).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["flagged"], false);
    }
}
