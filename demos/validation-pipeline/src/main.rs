//! Command-line driver for the guarded output pipeline.
//!
//! Reads configuration from the environment, validates agent output from
//! the command line or a JSON batch file, and prints the accepted records.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guarded_agents::config::AppConfig;
use guarded_agents::primitives::AgentOutput;
use guarded_agents::telemetry::logging;
use guarded_agents::{AgentDraft, GuardedPipeline};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "validation-pipeline", version, about = "Moderate, validate, and self-correct agent output")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate configuration, then print a summary.
    CheckConfig,
    /// Validate a single agent reply.
    Validate {
        /// Raw agent output.
        text: String,
        /// Name of the producing agent.
        #[arg(long, default_value = "Analyst")]
        agent: String,
        /// Override the retry budget.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Disable the built-in demo corrector.
        #[arg(long)]
        no_correction: bool,
    },
    /// Validate every draft in a JSON file and write the results.
    Batch {
        /// JSON array of `{"agent": ..., "output": ...}` objects.
        input: PathBuf,
        /// Where to write the results.
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct DraftRecord {
    agent: String,
    output: String,
}

#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    agent: &'a str,
    status: &'static str,
    result: Option<AgentOutput>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("failed to load configuration")?;
    logging::init(&config.agent);

    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::Validate {
            text,
            agent,
            max_attempts,
            no_correction,
        } => {
            if let Some(max_attempts) = max_attempts {
                config.security.max_retry_attempts = max_attempts;
            }
            validate_one(config, &agent, &text, !no_correction).await
        }
        Command::Batch { input, output } => run_batch(config, &input, &output).await,
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    config.validate().context("configuration check failed")?;
    info!(
        openai_configured = config.llm.openai_api_key.is_some(),
        moderation = config.security.enable_content_moderation,
        threshold = config.security.moderation_threshold,
        max_attempts = config.security.max_retry_attempts,
        tracing = config.observability.enable_tracing,
        endpoint = %config.observability.otel_endpoint,
        "configuration valid"
    );
    Ok(())
}

/// Stand-in for an LLM rewrite: wraps text in the structured reply shape,
/// or replaces flagged text with a neutral notice.
async fn demo_corrector(text: String, reason: String) -> Result<String, Infallible> {
    info!(%reason, "correcting output");
    let content = if reason.starts_with("content safety check failed") {
        "The requested content was withheld by the safety policy.".to_owned()
    } else {
        text.trim().trim_matches(|c| c == '{' || c == '}').trim().to_owned()
    };
    Ok(serde_json::json!({ "content": content, "confidence": 0.6 }).to_string())
}

async fn validate_one(config: AppConfig, agent: &str, text: &str, correct: bool) -> Result<()> {
    let pipeline = GuardedPipeline::from_config(config).await?;
    let corrector = demo_corrector;
    let result = pipeline
        .run(AgentDraft::new(agent, text), correct.then_some(&corrector))
        .await;
    pipeline.shutdown().await;

    let Ok(output) = result;
    match output {
        Some(output) => println!("{}", serde_json::to_string_pretty(&output)?),
        None => warn!(agent, "output rejected"),
    }
    Ok(())
}

async fn run_batch(config: AppConfig, input: &Path, output: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let drafts: Vec<DraftRecord> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a draft list", input.display()))?;

    let pipeline = GuardedPipeline::from_config(config).await?;
    let corrector = demo_corrector;
    info!(count = drafts.len(), "validating drafts");
    let results = pipeline
        .run_many(
            drafts
                .iter()
                .map(|draft| AgentDraft::new(&draft.agent, &draft.output)),
            Some(&corrector),
        )
        .await;
    pipeline.shutdown().await;

    let records: Vec<ResultRecord<'_>> = drafts
        .iter()
        .zip(results)
        .map(|(draft, result)| {
            let Ok(result) = result;
            ResultRecord {
                agent: &draft.agent,
                status: if result.is_some() { "success" } else { "failed" },
                result,
            }
        })
        .collect();

    let accepted = records.iter().filter(|record| record.result.is_some()).count();
    tokio::fs::write(output, serde_json::to_vec_pretty(&records)?)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(accepted, total = records.len(), path = %output.display(), "batch complete");
    Ok(())
}
