//! Strongly typed configuration schemas.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Credentials and limits for the model services behind the pipeline.
    pub llm: LlmConfig,
    /// Moderation and self-correction settings.
    pub security: SecurityConfig,
    /// Tracing and export settings.
    pub observability: ObservabilityConfig,
    /// Process-level logging settings.
    pub agent: AgentConfig,
}

/// Model service configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the OpenAI moderation endpoint. Moderation is skipped when unset.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible APIs.
    pub openai_base_url: String,
    /// Moderation model identifier.
    pub moderation_model: String,
    /// Timeout applied to each outbound request, in seconds.
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    /// Returns the request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/".to_owned(),
            moderation_model: "omni-moderation-latest".to_owned(),
            request_timeout_secs: 300,
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_base_url", &self.openai_base_url)
            .field("moderation_model", &self.moderation_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Moderation gate and correction loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Whether outputs are sent to the moderation service at all.
    pub enable_content_moderation: bool,
    /// Category score above which content is flagged regardless of the
    /// service verdict.
    pub moderation_threshold: f64,
    /// Upper bound on correction loop attempts.
    pub max_retry_attempts: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_content_moderation: true,
            moderation_threshold: 0.7,
            max_retry_attempts: 3,
        }
    }
}

/// Tracing and span export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Master switch for span creation.
    pub enable_tracing: bool,
    /// Primary OTLP collector endpoint.
    pub otel_endpoint: String,
    /// Protocol spoken by the primary endpoint.
    pub otel_protocol: OtlpProtocol,
    /// Port substituted into the primary endpoint when it is unavailable.
    pub otel_fallback_port: u16,
    /// Protocol spoken by the fallback endpoint.
    pub otel_fallback_protocol: OtlpProtocol,
    /// Whether the fallback port is tried at all.
    pub enable_exporter_fallback: bool,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
    /// `deployment.environment` resource attribute.
    pub deployment_environment: String,
    /// Timeout for the endpoint reachability check, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum number of spans per export request.
    pub export_batch_size: usize,
    /// Maximum delay between exports, in milliseconds.
    pub export_interval_ms: u64,
    /// Capacity of the in-process export queue.
    pub export_queue_capacity: usize,
}

impl ObservabilityConfig {
    /// Returns the endpoint reachability timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the export flush interval.
    #[must_use]
    pub const fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_tracing: true,
            otel_endpoint: "http://localhost:4317".to_owned(),
            otel_protocol: OtlpProtocol::Grpc,
            otel_fallback_port: 4318,
            otel_fallback_protocol: OtlpProtocol::HttpProtobuf,
            enable_exporter_fallback: true,
            service_name: "agent-guardrails".to_owned(),
            service_version: env!("CARGO_PKG_VERSION").to_owned(),
            deployment_environment: "development".to_owned(),
            connect_timeout_ms: 1_000,
            export_batch_size: 512,
            export_interval_ms: 5_000,
            export_queue_capacity: 2_048,
        }
    }
}

/// OTLP wire protocol of a collector endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtlpProtocol {
    /// Protobuf over gRPC, conventionally on port 4317.
    #[default]
    #[serde(rename = "grpc")]
    Grpc,
    /// Protobuf over HTTP POST to `/v1/traces`, conventionally on port 4318.
    #[serde(rename = "http/protobuf")]
    HttpProtobuf,
}

impl Display for OtlpProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grpc => "grpc",
            Self::HttpProtobuf => "http/protobuf",
        })
    }
}

impl FromStr for OtlpProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Self::Grpc),
            "http/protobuf" | "http" => Ok(Self::HttpProtobuf),
            other => Err(format!("unsupported OTLP protocol `{other}`")),
        }
    }
}

/// Output format of the process log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Text => "text",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" | "plain" => Ok(Self::Text),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Process logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log line encoding.
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert!(config.security.enable_content_moderation);
        assert_eq!(config.security.moderation_threshold, 0.7);
        assert_eq!(config.security.max_retry_attempts, 3);
        assert!(config.observability.enable_tracing);
        assert_eq!(config.observability.otel_endpoint, "http://localhost:4317");
        assert_eq!(config.observability.otel_fallback_port, 4318);
        assert!(config.observability.enable_exporter_fallback);
        assert_eq!(config.agent.log_format, LogFormat::Json);
    }

    #[test]
    fn debug_redacts_api_key() {
        let llm = LlmConfig {
            openai_api_key: Some("sk-secret".into()),
            ..LlmConfig::default()
        };
        let rendered = format!("{llm:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn log_format_parses_aliases() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
