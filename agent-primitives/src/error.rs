//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the guardrail crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building primitive types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The producing agent name was empty or whitespace.
    #[error("agent name cannot be empty")]
    EmptyAgentName,

    /// A confidence score was NaN or infinite and cannot be clamped.
    #[error("confidence must be a finite number, got {value}")]
    NonFiniteConfidence {
        /// The rejected value.
        value: f64,
    },
}
