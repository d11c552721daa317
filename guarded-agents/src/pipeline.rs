//! End-to-end wiring of the guarded output pipeline.

use std::sync::Arc;

use agent_adapters::openai::{OpenAiModerationAdapter, OpenAiModerationConfig};
use agent_adapters::traits::ModerationClient;
use agent_config::{AppConfig, LlmConfig};
use agent_guardrails::{CorrectionLoop, Corrector, OutputValidator};
use agent_policy::SafetyGate;
use agent_primitives::AgentOutput;
use agent_telemetry::{Telemetry, Tracer};
use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{info, warn};

/// Raw output of one agent awaiting validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentDraft<'a> {
    /// Producing agent.
    pub agent_name: &'a str,
    /// Unvalidated reply text.
    pub raw_output: &'a str,
}

impl<'a> AgentDraft<'a> {
    /// Creates a draft.
    #[must_use]
    pub const fn new(agent_name: &'a str, raw_output: &'a str) -> Self {
        Self {
            agent_name,
            raw_output,
        }
    }
}

/// Telemetry, safety gate, validator, and correction loop built from one config.
pub struct GuardedPipeline {
    config: AppConfig,
    telemetry: Telemetry,
    tracer: Tracer,
    correction: CorrectionLoop,
}

impl std::fmt::Debug for GuardedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedPipeline")
            .field("telemetry", &self.telemetry)
            .field("correction", &self.correction)
            .finish_non_exhaustive()
    }
}

impl GuardedPipeline {
    /// Builds the pipeline, connecting an `OpenAI` moderation client when an
    /// API key is configured.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the moderation client
    /// cannot be configured. Unreachable telemetry collectors are not errors.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let client = moderation_client(&config.llm)?;
        let telemetry = Telemetry::new(config.observability.clone());
        Self::with_components(config, telemetry, client).await
    }

    /// Builds the pipeline from explicit components.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid.
    pub async fn with_components(
        config: AppConfig,
        telemetry: Telemetry,
        client: Option<Arc<dyn ModerationClient>>,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline configuration")?;

        let tracer = telemetry.initialize().await;
        let gate = SafetyGate::from_config(&config.security, client, tracer.clone());
        if config.security.enable_content_moderation && !gate.is_active() {
            warn!("content moderation enabled but no moderation client configured");
        }
        let correction = CorrectionLoop::new(
            gate,
            OutputValidator::new(tracer.clone()),
            tracer.clone(),
            config.security.max_retry_attempts,
        );

        info!(
            max_attempts = config.security.max_retry_attempts,
            tracing = tracer.is_enabled(),
            "guarded pipeline ready"
        );

        Ok(Self {
            config,
            telemetry,
            tracer,
            correction,
        })
    }

    /// Returns the configuration the pipeline was built from.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the shared tracer.
    #[must_use]
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Returns the telemetry lifecycle.
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Validates one draft, correcting it when possible.
    ///
    /// # Errors
    ///
    /// Returns the corrector's error unchanged.
    pub async fn run<C>(
        &self,
        draft: AgentDraft<'_>,
        corrector: Option<&C>,
    ) -> Result<Option<AgentOutput>, C::Error>
    where
        C: Corrector + ?Sized,
    {
        self.correction
            .run(draft.raw_output, draft.agent_name, corrector)
            .await
    }

    /// Validates several drafts concurrently; results keep input order.
    pub async fn run_many<'a, C, I>(
        &self,
        drafts: I,
        corrector: Option<&C>,
    ) -> Vec<Result<Option<AgentOutput>, C::Error>>
    where
        C: Corrector + ?Sized,
        I: IntoIterator<Item = AgentDraft<'a>>,
    {
        join_all(drafts.into_iter().map(|draft| self.run(draft, corrector))).await
    }

    /// Flushes and stops span export.
    pub async fn shutdown(&self) {
        self.telemetry.shutdown().await;
    }
}

fn moderation_client(llm: &LlmConfig) -> Result<Option<Arc<dyn ModerationClient>>> {
    let Some(api_key) = llm.openai_api_key.as_deref().filter(|key| !key.trim().is_empty()) else {
        return Ok(None);
    };

    let config = OpenAiModerationConfig::new()
        .with_base_url(&llm.openai_base_url)
        .context("invalid OpenAI base URL")?
        .with_model(llm.moderation_model.clone())
        .with_timeout(llm.request_timeout())
        .with_api_key(api_key);
    let adapter = OpenAiModerationAdapter::new(config).context("failed to build moderation client")?;
    Ok(Some(Arc::new(adapter)))
}
