//! Normalized output records produced by successful validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Confidence, Error, Result};

/// Validated, normalized output of a single agent.
///
/// Instances are only produced through [`AgentOutputBuilder::build`], which
/// guarantees a non-empty agent name and a clamped confidence score. The
/// record is immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    content: String,
    agent_name: String,
    confidence: Confidence,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    sources: Vec<String>,
}

impl AgentOutput {
    /// Starts building an [`AgentOutput`] for the named agent.
    #[must_use]
    pub fn builder(agent_name: impl Into<String>, content: impl Into<String>) -> AgentOutputBuilder {
        AgentOutputBuilder {
            agent_name: agent_name.into(),
            content: content.into(),
            confidence: 0.0,
            metadata: Map::new(),
            sources: Vec::new(),
        }
    }

    /// Returns the primary content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the name of the agent that produced the content.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Returns the confidence score.
    #[must_use]
    pub const fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// Returns auxiliary metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the ordered list of information sources.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

/// Builder for [`AgentOutput`].
#[derive(Debug, Clone)]
pub struct AgentOutputBuilder {
    agent_name: String,
    content: String,
    confidence: f64,
    metadata: Map<String, Value>,
    sources: Vec<String>,
}

impl AgentOutputBuilder {
    /// Sets the raw confidence score; it is clamped into `[0, 1]` on build.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Replaces the metadata map.
    #[must_use]
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Inserts a single metadata entry.
    #[must_use]
    pub fn insert_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Replaces the source list.
    #[must_use]
    pub fn sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Finalises the output record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyAgentName`] when the agent name is blank and
    /// [`Error::NonFiniteConfidence`] when the score cannot be clamped.
    pub fn build(self) -> Result<AgentOutput> {
        if self.agent_name.trim().is_empty() {
            return Err(Error::EmptyAgentName);
        }

        Ok(AgentOutput {
            content: self.content,
            agent_name: self.agent_name,
            confidence: Confidence::new(self.confidence)?,
            metadata: self.metadata,
            sources: self.sources,
        })
    }
}
