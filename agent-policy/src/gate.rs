//! The content-safety gate.

use std::collections::BTreeSet;
use std::sync::Arc;

use agent_adapters::traits::{Classification, ModerationClient};
use agent_config::SecurityConfig;
use agent_telemetry::{ArgCounts, CaptureError, CapturedFields, TraceInput, Tracer, operation};
use tracing::{debug, error, warn};

use crate::moderation::ModerationResult;

/// Traced input of a moderation check.
#[derive(Debug, Clone, Copy)]
pub struct ModerationRequest<'a> {
    content: &'a str,
}

impl<'a> ModerationRequest<'a> {
    /// Wraps the text to moderate.
    #[must_use]
    pub const fn new(content: &'a str) -> Self {
        Self { content }
    }
}

impl TraceInput for ModerationRequest<'_> {
    fn arg_counts(&self) -> ArgCounts {
        ArgCounts::new(2, 0)
    }

    fn fields(&self) -> Result<CapturedFields, CaptureError> {
        Ok(CapturedFields {
            receiver: Some("SafetyGate".to_owned()),
            text: Some(self.content.to_owned()),
            ..CapturedFields::default()
        })
    }
}

/// Checks content against a moderation service before it may pass.
///
/// The gate fails open: when moderation is disabled, no client is
/// configured, or the service errors, content is reported as unflagged.
#[derive(Clone)]
pub struct SafetyGate {
    client: Option<Arc<dyn ModerationClient>>,
    enabled: bool,
    threshold: f64,
    tracer: Tracer,
}

impl std::fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGate")
            .field("provider", &self.client.as_ref().map(|client| client.provider()))
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl SafetyGate {
    /// Creates a gate with the given client, score threshold, and tracer.
    #[must_use]
    pub fn new(client: Option<Arc<dyn ModerationClient>>, threshold: f64, tracer: Tracer) -> Self {
        Self {
            client,
            enabled: true,
            threshold,
            tracer,
        }
    }

    /// Creates a gate from security settings.
    #[must_use]
    pub fn from_config(
        config: &SecurityConfig,
        client: Option<Arc<dyn ModerationClient>>,
        tracer: Tracer,
    ) -> Self {
        Self::new(client, config.moderation_threshold, tracer).enabled(config.enable_content_moderation)
    }

    /// Enables or disables moderation.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the score threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns true when checks reach a moderation service.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.client.is_some()
    }

    /// Moderates `content`. Never fails.
    pub async fn moderate(&self, content: &str) -> ModerationResult {
        let request = ModerationRequest::new(content);
        self.tracer
            .trace(operation::CONTENT_MODERATION, &request, self.check(content))
            .await
    }

    async fn check(&self, content: &str) -> ModerationResult {
        let client = match &self.client {
            Some(client) if self.enabled => client,
            _ => {
                debug!(enabled = self.enabled, "content moderation skipped");
                return ModerationResult::unflagged();
            }
        };

        match client.classify(content).await {
            Ok(classification) => self.judge(classification),
            Err(err) => {
                error!(provider = client.provider(), %err, "moderation request failed");
                ModerationResult::unchecked(format!("moderation service error: {err}"))
            }
        }
    }

    fn judge(&self, classification: Classification) -> ModerationResult {
        let flagged = classification.flagged || classification.max_score() > self.threshold;

        let reason = flagged.then(|| {
            let names: BTreeSet<&str> = classification
                .categories
                .keys()
                .chain(classification.scores.keys())
                .map(String::as_str)
                .collect();
            let triggered: Vec<&str> = names
                .into_iter()
                .filter(|name| {
                    classification.categories.get(*name).copied().unwrap_or(false)
                        || classification.scores.get(*name).copied().unwrap_or(0.0) > self.threshold
                })
                .collect();
            format!("triggered categories: {}", triggered.join(", "))
        });

        if let Some(reason) = &reason {
            warn!(%reason, "content flagged by moderation");
        }

        ModerationResult::new(flagged, classification.categories, classification.scores, reason)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_adapters::traits::{AdapterError, AdapterResult};
    use agent_telemetry::{AttributeValue, Resource, SpanRecorder};
    use async_trait::async_trait;

    use super::*;

    struct FixedClient {
        verdict: AdapterResult<Classification>,
        calls: AtomicUsize,
    }

    impl FixedClient {
        fn new(verdict: AdapterResult<Classification>) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModerationClient for FixedClient {
        fn provider(&self) -> &'static str {
            "fixed"
        }

        async fn classify(&self, _text: &str) -> AdapterResult<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn classification(flagged: bool, categories: &[(&str, bool)], scores: &[(&str, f64)]) -> Classification {
        Classification {
            flagged,
            categories: categories.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
            scores: scores.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
        }
    }

    #[tokio::test]
    async fn missing_client_is_unflagged() {
        let gate = SafetyGate::new(None, 0.7, Tracer::disabled());
        assert_eq!(gate.moderate("anything").await, ModerationResult::unflagged());
        assert!(!gate.is_active());
    }

    #[tokio::test]
    async fn disabled_gate_never_calls_the_client() {
        let client = FixedClient::new(Ok(classification(true, &[("hate", true)], &[])));
        let gate = SafetyGate::new(Some(client.clone()), 0.7, Tracer::disabled()).enabled(false);

        assert!(!gate.moderate("anything").await.is_flagged());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn high_scores_flag_even_when_service_does_not() {
        let client = FixedClient::new(Ok(classification(
            false,
            &[("violence", false), ("hate", false)],
            &[("violence", 0.91), ("hate", 0.1), ("self-harm", 0.75)],
        )));
        let gate = SafetyGate::new(Some(client), 0.7, Tracer::disabled());

        let result = gate.moderate("graphic text").await;
        assert!(result.is_flagged());
        assert_eq!(result.reason(), Some("triggered categories: self-harm, violence"));
        assert_eq!(result.category_scores().len(), 3);
    }

    #[tokio::test]
    async fn service_flag_lists_flagged_categories() {
        let client = FixedClient::new(Ok(classification(
            true,
            &[("harassment", true), ("hate", false)],
            &[("harassment", 0.4), ("hate", 0.2)],
        )));
        let gate = SafetyGate::new(Some(client), 0.7, Tracer::disabled());

        let result = gate.moderate("mean text").await;
        assert!(result.is_flagged());
        assert_eq!(result.reason(), Some("triggered categories: harassment"));
    }

    #[tokio::test]
    async fn scores_at_threshold_do_not_flag() {
        let client = FixedClient::new(Ok(classification(false, &[], &[("hate", 0.7)])));
        let gate = SafetyGate::new(Some(client), 0.7, Tracer::disabled());

        let result = gate.moderate("borderline").await;
        assert!(!result.is_flagged());
        assert_eq!(result.reason(), None);
    }

    #[tokio::test]
    async fn service_errors_fail_open_with_reason() {
        let client = FixedClient::new(Err(AdapterError::transport("connection reset")));
        let gate = SafetyGate::new(Some(client), 0.7, Tracer::disabled());

        let result = gate.moderate("text").await;
        assert!(!result.is_flagged());
        assert!(result.categories().is_empty());
        assert_eq!(
            result.reason(),
            Some("moderation service error: adapter transport error: connection reset")
        );
    }

    #[tokio::test]
    async fn moderation_is_traced_with_truncated_content() {
        let recorder = Arc::new(SpanRecorder::default());
        let tracer = Tracer::builder(Resource::default())
            .with_processor(recorder.clone())
            .build();
        let gate = SafetyGate::new(None, 0.7, tracer);

        gate.moderate(&"a".repeat(600)).await;

        let span = &recorder.named(operation::CONTENT_MODERATION)[0];
        let content = span.attribute("input.content").and_then(AttributeValue::as_str).unwrap();
        assert_eq!(content.len(), 500);
        assert_eq!(
            span.attribute("agent.status").and_then(AttributeValue::as_str),
            Some("success")
        );
        assert!(span.attribute("output.result").is_some());
        assert_eq!(
            span.attribute("output.type").and_then(AttributeValue::as_str),
            Some(std::any::type_name::<ModerationResult>())
        );
    }

    #[test]
    fn from_config_honours_switch_and_threshold() {
        let config = SecurityConfig {
            enable_content_moderation: false,
            moderation_threshold: 0.4,
            ..SecurityConfig::default()
        };
        let gate = SafetyGate::from_config(&config, None, Tracer::disabled());
        assert!(!gate.is_active());
        assert!((gate.threshold() - 0.4).abs() < f64::EPSILON);
    }
}
