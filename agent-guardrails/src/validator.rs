//! Format and quality validation of raw agent output.
//!
//! Output that looks like a JSON object must parse into the structured
//! reply shape; anything else is scored as free text.

use std::collections::HashSet;

use agent_primitives::AgentOutput;
use agent_telemetry::{
    ArgCounts, CaptureError, CapturedFields, RenderedOutput, TraceInput, TraceOutput, Tracer,
    operation, render_serialized,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{error, warn};

const MIN_TEXT_CHARS: usize = 10;
const DEFAULT_JSON_CONFIDENCE: f64 = 0.8;
const PUNCTUATION: &[char] = &['。', '！', '？', '.', ',', '!', '?'];

/// Verdict of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// The output passed and a structured record was produced.
    Valid,
    /// The output cannot be accepted and regenerating it is not expected to help.
    Invalid,
    /// The output has the wrong shape; a corrected version may pass.
    RetryNeeded,
    /// The output was rejected by policy.
    Blocked,
}

/// Status plus the structured output, present only when valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<AgentOutput>,
}

impl ValidationOutcome {
    /// A passing outcome.
    #[must_use]
    pub fn valid(output: AgentOutput) -> Self {
        Self {
            status: ValidationStatus::Valid,
            output: Some(output),
        }
    }

    /// A failing outcome with no output.
    ///
    /// `Valid` is mapped to `Invalid`, since a valid outcome always carries output.
    #[must_use]
    pub fn rejected(status: ValidationStatus) -> Self {
        let status = match status {
            ValidationStatus::Valid => ValidationStatus::Invalid,
            other => other,
        };
        Self {
            status,
            output: None,
        }
    }

    /// Returns the verdict.
    #[must_use]
    pub const fn status(&self) -> ValidationStatus {
        self.status
    }

    /// Returns the structured output when valid.
    #[must_use]
    pub fn output(&self) -> Option<&AgentOutput> {
        self.output.as_ref()
    }

    /// Consumes the outcome, returning the structured output when valid.
    #[must_use]
    pub fn into_output(self) -> Option<AgentOutput> {
        self.output
    }

    /// Returns true when the output passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

impl TraceOutput for ValidationOutcome {
    fn render(&self) -> Result<Option<RenderedOutput>, CaptureError> {
        render_serialized(self)
    }
}

/// Reasons a structured reply could not be accepted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The text looked like JSON but did not parse.
    #[error("malformed JSON output: {0}")]
    Json(#[from] serde_json::Error),
    /// A recognised field had the wrong type.
    #[error("field `{field}` must be {expected}")]
    FieldType {
        /// Field name.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
    /// The output record could not be built.
    #[error(transparent)]
    Output(#[from] agent_primitives::Error),
}

impl ValidationError {
    const fn status(&self) -> ValidationStatus {
        match self {
            Self::Json(_) | Self::FieldType { .. } => ValidationStatus::RetryNeeded,
            Self::Output(_) => ValidationStatus::Invalid,
        }
    }
}

/// Traced input of a validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    raw_output: &'a str,
    agent_name: &'a str,
}

impl<'a> ValidationRequest<'a> {
    /// Describes one validation call.
    #[must_use]
    pub const fn new(raw_output: &'a str, agent_name: &'a str) -> Self {
        Self {
            raw_output,
            agent_name,
        }
    }
}

impl TraceInput for ValidationRequest<'_> {
    fn arg_counts(&self) -> ArgCounts {
        ArgCounts::new(2, 0)
    }

    fn fields(&self) -> Result<CapturedFields, CaptureError> {
        Ok(CapturedFields {
            receiver: Some("OutputValidator".to_owned()),
            text: Some(self.raw_output.to_owned()),
            agent_name: Some(self.agent_name.to_owned()),
            ..CapturedFields::default()
        })
    }
}

/// Checks raw agent output and turns acceptable output into an [`AgentOutput`].
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    tracer: Tracer,
}

impl OutputValidator {
    /// Creates a validator reporting spans to `tracer`.
    #[must_use]
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    /// Validates `raw_output` produced by `agent_name`. Never fails.
    #[must_use]
    pub fn validate(&self, raw_output: &str, agent_name: &str) -> ValidationOutcome {
        let request = ValidationRequest::new(raw_output, agent_name);
        self.tracer
            .trace_blocking(operation::OUTPUT_VALIDATION, &request, || {
                Self::check(raw_output, agent_name)
            })
    }

    fn check(raw_output: &str, agent_name: &str) -> ValidationOutcome {
        let trimmed = raw_output.trim();
        let result = if trimmed.starts_with('{') && trimmed.ends_with('}') {
            parse_structured(raw_output, agent_name)
        } else if trimmed.chars().count() < MIN_TEXT_CHARS {
            return ValidationOutcome::rejected(ValidationStatus::Invalid);
        } else {
            build_text(raw_output, agent_name)
        };

        match result {
            Ok(output) => ValidationOutcome::valid(output),
            Err(err) => {
                let status = err.status();
                if status == ValidationStatus::RetryNeeded {
                    warn!(agent = agent_name, %err, "structured output rejected");
                } else {
                    error!(agent = agent_name, %err, "output validation failed");
                }
                ValidationOutcome::rejected(status)
            }
        }
    }
}

fn parse_structured(raw_output: &str, agent_name: &str) -> Result<AgentOutput, ValidationError> {
    let mut document: Map<String, Value> = serde_json::from_str(raw_output.trim())?;

    let content = match document.remove("content") {
        None => raw_output.to_owned(),
        Some(Value::String(content)) => content,
        Some(_) => return Err(field_type("content", "a string")),
    };
    let confidence = match document.remove("confidence") {
        None => DEFAULT_JSON_CONFIDENCE,
        Some(value) => value.as_f64().ok_or_else(|| field_type("confidence", "a number"))?,
    };
    let metadata = match document.remove("metadata") {
        None => Map::new(),
        Some(Value::Object(metadata)) => metadata,
        Some(_) => return Err(field_type("metadata", "an object")),
    };
    let sources = match document.remove("sources") {
        None => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<String>>(value)
            .map_err(|_| field_type("sources", "an array of strings"))?,
    };

    Ok(AgentOutput::builder(agent_name, content)
        .confidence(confidence)
        .metadata(metadata)
        .sources(sources)
        .build()?)
}

fn build_text(raw_output: &str, agent_name: &str) -> Result<AgentOutput, ValidationError> {
    let length = raw_output.chars().count();
    Ok(AgentOutput::builder(agent_name, raw_output.trim())
        .confidence(quality_score(raw_output))
        .insert_metadata("format", json!("text"))
        .insert_metadata("length", json!(length))
        .build()?)
}

const fn field_type(field: &'static str, expected: &'static str) -> ValidationError {
    ValidationError::FieldType { field, expected }
}

/// Heuristic quality score of free text, in `[0.5, 1.0]`.
#[must_use]
pub fn quality_score(text: &str) -> f64 {
    let mut tenths: u8 = 5;

    if (50..=2_000).contains(&text.chars().count()) {
        tenths += 2;
    }
    if text.contains(PUNCTUATION) {
        tenths += 1;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if !words.is_empty() {
        let distinct = words.iter().collect::<HashSet<_>>().len();
        // distinct / total > 0.7
        if distinct * 10 > words.len() * 7 {
            tenths += 2;
        }
    }

    f64::from(tenths.min(10)) / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(raw: &str) -> ValidationOutcome {
        OutputValidator::default().validate(raw, "Writer")
    }

    #[test]
    fn short_text_is_invalid() {
        let outcome = validate("   too short  ");
        assert_eq!(outcome.status(), ValidationStatus::Invalid);
        assert!(outcome.output().is_none());
    }

    #[test]
    fn json_content_round_trips() {
        let outcome = validate(r#"{"content": "EV sales grew 30%", "confidence": 0.93, "sources": ["iea.org"]}"#);
        let output = outcome.output().unwrap();
        assert_eq!(output.content(), "EV sales grew 30%");
        assert!((output.confidence().value() - 0.93).abs() < f64::EPSILON);
        assert_eq!(output.sources(), ["iea.org"]);
        assert_eq!(output.agent_name(), "Writer");
    }

    #[test]
    fn json_defaults_apply() {
        let raw = r#"  {"summary": "ok"}  "#;
        let output = validate(raw).into_output().unwrap();
        assert_eq!(output.content(), raw);
        assert!((output.confidence().value() - 0.8).abs() < f64::EPSILON);
        assert!(output.metadata().is_empty());
    }

    #[test]
    fn json_confidence_is_clamped() {
        let output = validate(r#"{"content": "x", "confidence": 3}"#).into_output().unwrap();
        assert!((output.confidence().value() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_json_needs_retry() {
        assert_eq!(validate("{not json at all}").status(), ValidationStatus::RetryNeeded);
    }

    #[test]
    fn mistyped_fields_need_retry() {
        for raw in [
            r#"{"content": 5}"#,
            r#"{"confidence": "high"}"#,
            r#"{"confidence": null}"#,
            r#"{"metadata": []}"#,
            r#"{"sources": [1, 2]}"#,
        ] {
            assert_eq!(validate(raw).status(), ValidationStatus::RetryNeeded, "{raw}");
        }
    }

    #[test]
    fn free_text_gets_scored_metadata() {
        let raw = "  The electric vehicle market expanded quickly in every major region last year.  ";
        let output = validate(raw).into_output().unwrap();
        assert_eq!(output.content(), raw.trim());
        assert_eq!(output.metadata()["format"], "text");
        assert_eq!(output.metadata()["length"], raw.chars().count());
        assert!((output.confidence().value() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_agent_name_is_invalid() {
        let outcome = OutputValidator::default().validate("A perfectly reasonable sentence.", "  ");
        assert_eq!(outcome.status(), ValidationStatus::Invalid);
    }

    #[test]
    fn quality_score_components() {
        assert!((quality_score("word word word word word word") - 0.5).abs() < f64::EPSILON);
        assert!((quality_score("alpha beta gamma delta") - 0.7).abs() < f64::EPSILON);
        assert!((quality_score("alpha beta, gamma delta") - 0.8).abs() < f64::EPSILON);
        assert!((quality_score("数据分析报告已经完成。") - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn rejected_never_reports_valid() {
        assert_eq!(
            ValidationOutcome::rejected(ValidationStatus::Valid).status(),
            ValidationStatus::Invalid
        );
    }

    #[test]
    fn validation_span_renders_the_outcome() {
        use std::sync::Arc;

        use agent_telemetry::{AttributeValue, Resource, SpanRecorder};

        let recorder = Arc::new(SpanRecorder::default());
        let tracer = Tracer::builder(Resource::default())
            .with_processor(recorder.clone())
            .build();

        let outcome = OutputValidator::new(tracer).validate("ok", "Writer");
        assert_eq!(outcome.status(), ValidationStatus::Invalid);

        let span = &recorder.named(operation::OUTPUT_VALIDATION)[0];
        assert_eq!(
            span.attribute("agent.status").and_then(AttributeValue::as_str),
            Some("success")
        );
        assert!(
            span.attribute("output.result")
                .and_then(AttributeValue::as_str)
                .unwrap()
                .contains("invalid")
        );
    }
}
