//! Core shared types for guarded agent pipelines.

#![warn(missing_docs, clippy::pedantic)]

mod confidence;
mod error;
mod output;

/// Bounded confidence score attached to validated outputs.
pub use confidence::Confidence;
/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
/// Normalized agent output produced by validation.
pub use output::{AgentOutput, AgentOutputBuilder};
