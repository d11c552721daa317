//! Configuration management for guarded agent pipelines.
//!
//! Settings are read once at startup. Every field has a default and can be
//! overridden from the process environment, any [`ConfigSource`], or a JSON
//! document.

#![warn(missing_docs, clippy::pedantic)]

mod loader;
mod schema;

pub use loader::{ConfigError, ConfigResult, ConfigSource, EnvSource, keys};
pub use schema::{
    AgentConfig, AppConfig, LlmConfig, LogFormat, ObservabilityConfig, OtlpProtocol, SecurityConfig,
};
