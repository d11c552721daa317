//! Guarded output pipeline for multi-agent systems.
//!
//! Depend on this crate via `cargo add guarded-agents`. It bundles the
//! internal crates behind feature flags; the `pipeline` feature adds
//! [`GuardedPipeline`], which wires telemetry, moderation, validation, and
//! self-correction from a single [`AppConfig`](agent_config::AppConfig).

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agent_primitives as primitives;

/// Moderation service adapters (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use agent_adapters as adapters;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Output validation and self-correction (enabled by `guardrails` feature).
#[cfg(feature = "guardrails")]
pub use agent_guardrails as guardrails;

/// Content-safety gate (enabled by `policy` feature).
#[cfg(feature = "policy")]
pub use agent_policy as policy;

/// Tracing and span export (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

#[cfg(feature = "pipeline")]
mod pipeline;

#[cfg(feature = "pipeline")]
pub use pipeline::{AgentDraft, GuardedPipeline};
