//! Process-wide `tracing` subscriber bootstrap.

use agent_config::{AgentConfig, LogFormat};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global subscriber honouring `RUST_LOG` or `config.log_level`.
///
/// Returns `false` when a subscriber was already installed; the existing
/// one is kept.
pub fn init(config: &AgentConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let config = AgentConfig {
            log_format: LogFormat::Text,
            ..AgentConfig::default()
        };
        let _ = init(&config);
        assert!(!init(&config));
    }
}
