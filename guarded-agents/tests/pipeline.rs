use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use guarded_agents::adapters::traits::{AdapterResult, Classification, ModerationClient};
use guarded_agents::config::AppConfig;
use guarded_agents::telemetry::{SpanRecorder, Telemetry, operation};
use guarded_agents::{AgentDraft, GuardedPipeline};
use thiserror::Error;

struct BlocklistModerator;

#[async_trait]
impl ModerationClient for BlocklistModerator {
    fn provider(&self) -> &'static str {
        "blocklist"
    }

    async fn classify(&self, text: &str) -> AdapterResult<Classification> {
        let hit = text.contains("forbidden");
        Ok(Classification {
            flagged: hit,
            categories: [("illicit".to_owned(), hit)].into(),
            scores: [("illicit".to_owned(), if hit { 0.99 } else { 0.0 })].into(),
        })
    }
}

#[derive(Debug, Error)]
#[error("rewrite failed")]
struct RewriteFailed;

fn offline_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.observability.otel_endpoint = "http://127.0.0.1:9".to_owned();
    config.observability.otel_fallback_port = 9;
    config.observability.connect_timeout_ms = 200;
    config
}

async fn pipeline(recorder: Arc<SpanRecorder>) -> GuardedPipeline {
    let config = offline_config();
    let telemetry = Telemetry::new(config.observability.clone()).with_processor(recorder);
    GuardedPipeline::with_components(config, telemetry, Some(Arc::new(BlocklistModerator)))
        .await
        .unwrap()
}

#[tokio::test]
async fn unreachable_collector_does_not_block_the_pipeline() {
    let recorder = Arc::new(SpanRecorder::default());
    let pipeline = pipeline(recorder.clone()).await;

    assert!(pipeline.tracer().is_enabled());
    assert!(pipeline.telemetry().active_exporter().is_none());

    let rewrites = AtomicUsize::new(0);
    let corrector = |_text: String, _reason: String| {
        rewrites.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RewriteFailed>("The revised summary avoids the flagged topic entirely.".to_owned()) }
    };

    let output = pipeline
        .run(
            AgentDraft::new("Researcher", "Here is the forbidden recipe you asked for."),
            Some(&corrector),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.agent_name(), "Researcher");
    assert_eq!(rewrites.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.named(operation::SELF_CORRECTION).len(), 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn run_many_keeps_input_order() {
    let recorder = Arc::new(SpanRecorder::default());
    let pipeline = pipeline(recorder.clone()).await;

    let drafts = [
        AgentDraft::new("Analyst", r#"{"content": "Market grew 12%", "confidence": 0.7}"#),
        AgentDraft::new("Writer", "ok"),
        AgentDraft::new("Critic", "The draft is clear, well sourced, and ready to publish."),
    ];
    let results = pipeline
        .run_many(drafts, None::<&guarded_agents::guardrails::NoCorrection>)
        .await;

    let contents: Vec<Option<String>> = results
        .into_iter()
        .map(|result| result.unwrap().map(|output| output.content().to_owned()))
        .collect();
    assert_eq!(contents[0].as_deref(), Some("Market grew 12%"));
    assert_eq!(contents[1], None);
    assert_eq!(
        contents[2].as_deref(),
        Some("The draft is clear, well sourced, and ready to publish.")
    );
    assert_eq!(recorder.named(operation::SELF_CORRECTION).len(), 3);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let mut config = offline_config();
    config.security.moderation_threshold = 1.5;

    let telemetry = Telemetry::new(config.observability.clone());
    let err = GuardedPipeline::with_components(config, telemetry, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid pipeline configuration"));
}

#[tokio::test]
async fn missing_api_key_means_no_moderation_client() {
    let mut config = offline_config();
    config.llm.openai_api_key = None;
    config.observability.enable_tracing = false;

    let pipeline = GuardedPipeline::from_config(config).await.unwrap();
    assert!(!pipeline.tracer().is_enabled());
    let output = pipeline
        .run(
            AgentDraft::new("Writer", "Nothing to moderate here, just a plain status update."),
            None::<&guarded_agents::guardrails::NoCorrection>,
        )
        .await
        .unwrap();
    assert!(output.is_some());
}
