//! Bounded self-correction: moderate, validate, and regenerate on failure.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;

use agent_config::SecurityConfig;
use agent_policy::SafetyGate;
use agent_primitives::AgentOutput;
use agent_telemetry::{
    ArgCounts, CaptureError, CapturedFields, MessageRole, TraceInput, Tracer, operation,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::validator::{OutputValidator, ValidationStatus};

const VALIDATOR_AGENT: &str = "Validator";
const SAFETY_REASON_PREFIX: &str = "content safety check failed";
const FORMAT_REASON: &str = "output format does not meet requirements";

/// Regenerates rejected output given the rejection reason.
///
/// Any `Fn(String, String) -> impl Future<Output = Result<String, E>>`
/// closure is a corrector.
#[async_trait]
pub trait Corrector: Send + Sync {
    /// Error returned when regeneration fails.
    type Error: StdError + Send + Sync + 'static;

    /// Returns a replacement for `text`, which was rejected for `reason`.
    async fn correct(&self, text: String, reason: String) -> Result<String, Self::Error>;
}

#[async_trait]
impl<F, Fut, E> Corrector for F
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, E>> + Send,
    E: StdError + Send + Sync + 'static,
{
    type Error = E;

    async fn correct(&self, text: String, reason: String) -> Result<String, E> {
        (self)(text, reason).await
    }
}

/// A corrector that is never available; used by [`CorrectionLoop::run_unassisted`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

#[async_trait]
impl Corrector for NoCorrection {
    type Error = Infallible;

    async fn correct(&self, text: String, _reason: String) -> Result<String, Infallible> {
        Ok(text)
    }
}

/// Traced input of a correction loop run.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionRequest<'a> {
    raw_output: &'a str,
    agent_name: &'a str,
    with_corrector: bool,
}

impl<'a> CorrectionRequest<'a> {
    /// Describes one loop run.
    #[must_use]
    pub const fn new(raw_output: &'a str, agent_name: &'a str, with_corrector: bool) -> Self {
        Self {
            raw_output,
            agent_name,
            with_corrector,
        }
    }
}

impl TraceInput for CorrectionRequest<'_> {
    fn arg_counts(&self) -> ArgCounts {
        ArgCounts::new(2, usize::from(self.with_corrector))
    }

    fn fields(&self) -> Result<CapturedFields, CaptureError> {
        Ok(CapturedFields {
            receiver: Some("CorrectionLoop".to_owned()),
            text: Some(self.raw_output.to_owned()),
            agent_name: Some(self.agent_name.to_owned()),
            ..CapturedFields::default()
        })
    }
}

/// Chains the safety gate and the validator, asking a corrector to
/// regenerate output until it passes or the attempt budget runs out.
#[derive(Debug, Clone)]
pub struct CorrectionLoop {
    gate: SafetyGate,
    validator: OutputValidator,
    tracer: Tracer,
    max_attempts: u32,
}

impl CorrectionLoop {
    /// Creates a loop performing at most `max_attempts` checks per run.
    #[must_use]
    pub fn new(gate: SafetyGate, validator: OutputValidator, tracer: Tracer, max_attempts: u32) -> Self {
        Self {
            gate,
            validator,
            tracer,
            max_attempts,
        }
    }

    /// Creates a loop using the retry budget from security settings.
    #[must_use]
    pub fn from_config(config: &SecurityConfig, gate: SafetyGate, tracer: Tracer) -> Self {
        Self::new(
            gate,
            OutputValidator::new(tracer.clone()),
            tracer,
            config.max_retry_attempts,
        )
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs the loop without a corrector.
    pub async fn run_unassisted(&self, raw_output: &str, agent_name: &str) -> Option<AgentOutput> {
        let Ok(output) = self.run::<NoCorrection>(raw_output, agent_name, None).await;
        output
    }

    /// Runs the loop.
    ///
    /// Returns the first output that passes moderation and validation, or
    /// `None` once the attempt budget is spent or content stays flagged.
    ///
    /// # Errors
    ///
    /// Returns the corrector's error unchanged; no further attempts are made.
    pub async fn run<C>(
        &self,
        raw_output: &str,
        agent_name: &str,
        corrector: Option<&C>,
    ) -> Result<Option<AgentOutput>, C::Error>
    where
        C: Corrector + ?Sized,
    {
        let request = CorrectionRequest::new(raw_output, agent_name, corrector.is_some());
        self.tracer
            .trace(
                operation::SELF_CORRECTION,
                &request,
                self.attempts(raw_output, agent_name, corrector),
            )
            .await
    }

    async fn attempts<C>(
        &self,
        raw_output: &str,
        agent_name: &str,
        corrector: Option<&C>,
    ) -> Result<Option<AgentOutput>, C::Error>
    where
        C: Corrector + ?Sized,
    {
        let max = self.max_attempts;
        let mut text = raw_output.to_owned();

        for attempt in 1..=max {
            let last = attempt == max;
            self.announce(
                &format!("validating output of {agent_name} (attempt {attempt}/{max})"),
                attempt,
            );

            let moderation = self.gate.moderate(&text).await;
            if moderation.is_flagged() {
                let reason = moderation.reason().unwrap_or_default();
                warn!(agent = agent_name, attempt, %reason, "output flagged as unsafe");
                if last {
                    return Ok(None);
                }
                let Some(corrector) = corrector else {
                    return Ok(None);
                };
                text = corrector
                    .correct(text, format!("{SAFETY_REASON_PREFIX}: {reason}"))
                    .await?;
                continue;
            }

            let outcome = self.validator.validate(&text, agent_name);
            match outcome.status() {
                ValidationStatus::Valid => {
                    self.announce(&format!("output of {agent_name} passed validation"), attempt);
                    return Ok(outcome.into_output());
                }
                ValidationStatus::RetryNeeded => {
                    warn!(agent = agent_name, attempt, "output format needs correction");
                    if let (Some(corrector), false) = (corrector, last) {
                        text = corrector.correct(text, FORMAT_REASON.to_owned()).await?;
                        continue;
                    }
                }
                ValidationStatus::Invalid | ValidationStatus::Blocked => {}
            }

            // The same text is re-checked on the next attempt.
            if last {
                error!(agent = agent_name, attempts = max, "output validation failed");
                return Ok(None);
            }
        }

        Ok(None)
    }

    fn announce(&self, message: &str, attempt: u32) {
        let mut metadata = Map::new();
        metadata.insert("attempt".to_owned(), Value::from(attempt));
        metadata.insert("max_attempts".to_owned(), Value::from(self.max_attempts));
        self.tracer
            .log_conversation(VALIDATOR_AGENT, message, MessageRole::System, &metadata);
    }
}
