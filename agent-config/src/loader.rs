//! Configuration loader implementations.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::schema::{AppConfig, LogFormat};

/// Environment keys recognised by [`AppConfig::from_source`].
pub mod keys {
    /// OpenAI API key used by the moderation adapter.
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    /// Base URL for OpenAI-compatible APIs.
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    /// Moderation model identifier.
    pub const MODERATION_MODEL: &str = "MODERATION_MODEL";
    /// Outbound request timeout in seconds.
    pub const LLM_REQUEST_TIMEOUT_SECS: &str = "LLM_REQUEST_TIMEOUT_SECS";
    /// Toggles the moderation gate.
    pub const ENABLE_CONTENT_MODERATION: &str = "ENABLE_CONTENT_MODERATION";
    /// Moderation score threshold.
    pub const MODERATION_THRESHOLD: &str = "MODERATION_THRESHOLD";
    /// Maximum correction attempts.
    pub const MAX_RETRY_ATTEMPTS: &str = "MAX_RETRY_ATTEMPTS";
    /// Toggles span creation.
    pub const ENABLE_TRACING: &str = "ENABLE_TRACING";
    /// Primary collector endpoint (standard OTLP variable).
    pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    /// Fallback collector port.
    pub const OTEL_FALLBACK_PORT: &str = "OTEL_FALLBACK_PORT";
    /// Primary endpoint protocol (`grpc` or `http/protobuf`).
    pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
    /// Fallback endpoint protocol (`grpc` or `http/protobuf`).
    pub const OTEL_FALLBACK_PROTOCOL: &str = "OTEL_FALLBACK_PROTOCOL";
    /// Toggles the fallback endpoint.
    pub const ENABLE_EXPORTER_FALLBACK: &str = "ENABLE_EXPORTER_FALLBACK";
    /// `service.name` resource attribute (standard OTLP variable).
    pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    /// `deployment.environment` resource attribute.
    pub const DEPLOYMENT_ENVIRONMENT: &str = "DEPLOYMENT_ENVIRONMENT";
    /// Default log filter.
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    /// Log encoding.
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while loading configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A key held a value that could not be parsed.
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidValue {
        /// Offending key.
        key: String,
        /// Raw value as supplied.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A JSON configuration document could not be decoded.
    #[error("invalid configuration document: {reason}")]
    Document {
        /// Decoder message.
        reason: String,
    },

    /// The assembled configuration violated a constraint.
    #[error("invalid configuration: {reason}")]
    Constraint {
        /// Violated constraint.
        reason: String,
    },
}

/// Key/value source of configuration overrides.
pub trait ConfigSource {
    /// Returns the raw value for `key`, if present.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads overrides from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|value| (*value).to_owned())
    }
}

impl AppConfig {
    /// Loads defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable cannot be parsed or the result
    /// violates a constraint.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_source(&EnvSource)
    }

    /// Loads defaults overridden by the supplied source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value cannot be parsed or the result
    /// violates a constraint.
    pub fn from_source(source: &impl ConfigSource) -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Decodes a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Document`] for malformed JSON and
    /// [`ConfigError::Constraint`] when the result is out of range.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(document).map_err(|err| ConfigError::Document {
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `source` on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a value cannot be parsed.
    pub fn apply(&mut self, source: &impl ConfigSource) -> ConfigResult<()> {
        if let Some(key) = source.get(keys::OPENAI_API_KEY).filter(|key| !key.trim().is_empty()) {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(url) = source.get(keys::OPENAI_BASE_URL) {
            self.llm.openai_base_url = url;
        }
        if let Some(model) = source.get(keys::MODERATION_MODEL) {
            self.llm.moderation_model = model;
        }
        override_parsed(source, keys::LLM_REQUEST_TIMEOUT_SECS, &mut self.llm.request_timeout_secs)?;

        override_bool(
            source,
            keys::ENABLE_CONTENT_MODERATION,
            &mut self.security.enable_content_moderation,
        )?;
        override_parsed(source, keys::MODERATION_THRESHOLD, &mut self.security.moderation_threshold)?;
        override_parsed(source, keys::MAX_RETRY_ATTEMPTS, &mut self.security.max_retry_attempts)?;

        override_bool(source, keys::ENABLE_TRACING, &mut self.observability.enable_tracing)?;
        if let Some(endpoint) = source.get(keys::OTEL_EXPORTER_OTLP_ENDPOINT) {
            self.observability.otel_endpoint = endpoint;
        }
        override_parsed(source, keys::OTEL_EXPORTER_OTLP_PROTOCOL, &mut self.observability.otel_protocol)?;
        override_parsed(source, keys::OTEL_FALLBACK_PORT, &mut self.observability.otel_fallback_port)?;
        override_parsed(
            source,
            keys::OTEL_FALLBACK_PROTOCOL,
            &mut self.observability.otel_fallback_protocol,
        )?;
        override_bool(
            source,
            keys::ENABLE_EXPORTER_FALLBACK,
            &mut self.observability.enable_exporter_fallback,
        )?;
        if let Some(name) = source.get(keys::OTEL_SERVICE_NAME) {
            self.observability.service_name = name;
        }
        if let Some(environment) = source.get(keys::DEPLOYMENT_ENVIRONMENT) {
            self.observability.deployment_environment = environment;
        }

        if let Some(level) = source.get(keys::LOG_LEVEL) {
            self.agent.log_level = level.to_ascii_lowercase();
        }
        override_parsed::<LogFormat>(source, keys::LOG_FORMAT, &mut self.agent.log_format)?;

        debug!(config = ?self, "configuration overrides applied");
        Ok(())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Constraint`] describing the first violation.
    pub fn validate(&self) -> ConfigResult<()> {
        let threshold = self.security.moderation_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Constraint {
                reason: format!("moderation threshold {threshold} must be within [0, 1]"),
            });
        }
        if self.observability.otel_endpoint.trim().is_empty() {
            return Err(ConfigError::Constraint {
                reason: "OTLP endpoint cannot be empty".to_owned(),
            });
        }
        if self.observability.export_batch_size == 0 || self.observability.export_queue_capacity == 0 {
            return Err(ConfigError::Constraint {
                reason: "export batch size and queue capacity must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

fn override_parsed<T>(source: &impl ConfigSource, key: &str, slot: &mut T) -> ConfigResult<()>
where
    T: FromStr,
    T::Err: ToString,
{
    if let Some(raw) = source.get(key) {
        *slot = raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw.clone(),
            reason: err.to_string(),
        })?;
    }
    Ok(())
}

fn override_bool(source: &impl ConfigSource, key: &str, slot: &mut bool) -> ConfigResult<()> {
    if let Some(raw) = source.get(key) {
        *slot = parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw.clone(),
            reason: "expected true/false, 1/0, or yes/no".to_owned(),
        })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OtlpProtocol;

    #[test]
    fn source_overrides_defaults() {
        let source = HashMap::from([
            (keys::ENABLE_CONTENT_MODERATION, "no"),
            (keys::MODERATION_THRESHOLD, "0.55"),
            (keys::MAX_RETRY_ATTEMPTS, "5"),
            (keys::OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4317"),
            (keys::OTEL_FALLBACK_PORT, "6006"),
            (keys::LOG_FORMAT, "text"),
            (keys::OPENAI_API_KEY, "sk-test"),
        ]);

        let config = AppConfig::from_source(&source).unwrap();
        assert!(!config.security.enable_content_moderation);
        assert_eq!(config.security.moderation_threshold, 0.55);
        assert_eq!(config.security.max_retry_attempts, 5);
        assert_eq!(config.observability.otel_endpoint, "http://collector:4317");
        assert_eq!(config.observability.otel_fallback_port, 6006);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.llm.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn endpoint_protocols_default_to_grpc_then_http() {
        let config = AppConfig::from_source(&HashMap::<&str, &str>::new()).unwrap();
        assert_eq!(config.observability.otel_protocol, OtlpProtocol::Grpc);
        assert_eq!(config.observability.otel_fallback_protocol, OtlpProtocol::HttpProtobuf);

        let source = HashMap::from([
            (keys::OTEL_EXPORTER_OTLP_PROTOCOL, "http/protobuf"),
            (keys::OTEL_FALLBACK_PROTOCOL, "GRPC"),
        ]);
        let config = AppConfig::from_source(&source).unwrap();
        assert_eq!(config.observability.otel_protocol, OtlpProtocol::HttpProtobuf);
        assert_eq!(config.observability.otel_fallback_protocol, OtlpProtocol::Grpc);

        let source = HashMap::from([(keys::OTEL_EXPORTER_OTLP_PROTOCOL, "thrift")]);
        assert!(AppConfig::from_source(&source).is_err());
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let source = HashMap::from([(keys::OPENAI_API_KEY, "   ")]);
        let config = AppConfig::from_source(&source).unwrap();
        assert!(config.llm.openai_api_key.is_none());
    }

    #[test]
    fn invalid_values_name_the_key() {
        let source = HashMap::from([(keys::MAX_RETRY_ATTEMPTS, "three")]);
        let err = AppConfig::from_source(&source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == keys::MAX_RETRY_ATTEMPTS));

        let source = HashMap::from([(keys::ENABLE_TRACING, "maybe")]);
        assert!(AppConfig::from_source(&source).is_err());
    }

    #[test]
    fn threshold_must_be_a_probability() {
        let source = HashMap::from([(keys::MODERATION_THRESHOLD, "1.5")]);
        let err = AppConfig::from_source(&source).unwrap_err();
        assert!(matches!(err, ConfigError::Constraint { .. }));
    }

    #[test]
    fn json_document_keeps_missing_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "security": { "max_retry_attempts": 1 }, "agent": { "log_format": "text" } }"#,
        )
        .unwrap();

        assert_eq!(config.security.max_retry_attempts, 1);
        assert_eq!(config.security.moderation_threshold, 0.7);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert!(config.observability.enable_tracing);
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Document { .. }));
    }
}
