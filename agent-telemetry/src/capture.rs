//! Typed input/output capture for instrumented operations.
//!
//! Each instrumented call hands the tracer a [`TraceInput`] describing its
//! arguments and returns a [`TraceOutput`]. Which input fields become span
//! attributes is decided by a lookup table keyed on the operation name, so
//! callers using different request shapes are all captured the same way.

use std::error::Error as StdError;

use serde::Serialize;
use thiserror::Error;

use crate::span::{ActiveSpan, SpanStatus};

/// Well-known operation names.
pub mod operation {
    /// An agent producing a reply in a conversation.
    pub const AGENT_REPLY: &str = "agent_generate_reply";
    /// A moderation gate check.
    pub const CONTENT_MODERATION: &str = "content_moderation";
    /// An output format validation.
    pub const OUTPUT_VALIDATION: &str = "output_validation";
    /// A full self-correction loop run.
    pub const SELF_CORRECTION: &str = "self_correction_loop";
    /// A conversation log record.
    pub const CONVERSATION: &str = "agent_conversation";
}

/// Character limits applied to captured values.
pub mod limits {
    /// Single-value captures such as moderation or validation input.
    pub const SINGLE_VALUE: usize = 500;
    /// Composite captures such as full message lists.
    pub const COMPOSITE: usize = 1_000;
    /// Rendered return values.
    pub const RESULT: usize = 1_000;
    /// Identifiers such as agent or sender names.
    pub const IDENTIFIER: usize = 200;
}

/// Attribute keys written by the instrumentation layer.
pub mod keys {
    /// Operation name.
    pub const OPERATION: &str = "agent.operation";
    /// Number of positional arguments.
    pub const POSITIONAL_ARGS: &str = "agent.positional_arg_count";
    /// Number of named arguments.
    pub const NAMED_ARGS: &str = "agent.named_arg_count";
    /// `success` or `error`.
    pub const STATUS: &str = "agent.status";
    /// Wall-clock duration in seconds.
    pub const DURATION_SECONDS: &str = "agent.duration_seconds";
    /// Error type name.
    pub const ERROR_TYPE: &str = "agent.error_type";
    /// Error display message.
    pub const ERROR_MESSAGE: &str = "agent.error_message";
    /// Diagnostic recorded when input capture fails.
    pub const INPUT_CAPTURE_ERROR: &str = "agent.input_capture_error";
    /// Diagnostic recorded when output capture fails.
    pub const OUTPUT_CAPTURE_ERROR: &str = "agent.output_capture_error";
    /// Rendered return value.
    pub const OUTPUT_RESULT: &str = "output.result";
    /// Return value type name.
    pub const OUTPUT_TYPE: &str = "output.type";
}

/// Failure to turn an argument or result into span attributes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A value could not be serialized.
    #[error("failed to serialize {what}: {reason}")]
    Serialization {
        /// What was being serialized.
        what: &'static str,
        /// Serializer message.
        reason: String,
    },
    /// A field could not be produced for another reason.
    #[error("field `{field}` unavailable: {reason}")]
    Unavailable {
        /// Field name.
        field: &'static str,
        /// Explanation.
        reason: String,
    },
}

/// Number of positional and named arguments of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgCounts {
    /// Arguments passed by position.
    pub positional: usize,
    /// Arguments passed by name or as optional fields.
    pub named: usize,
}

impl ArgCounts {
    /// Creates a count pair.
    #[must_use]
    pub const fn new(positional: usize, named: usize) -> Self {
        Self { positional, named }
    }
}

/// Fields an input may expose for capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedFields {
    /// Type or name of the object the call was made on.
    pub receiver: Option<String>,
    /// Primary text argument.
    pub text: Option<String>,
    /// Serialized message list.
    pub messages: Option<String>,
    /// Sender identifier.
    pub sender: Option<String>,
    /// Producing agent name.
    pub agent_name: Option<String>,
}

/// Typed description of an instrumented call's arguments.
pub trait TraceInput {
    /// Returns the positional/named argument counts.
    fn arg_counts(&self) -> ArgCounts;

    /// Returns the fields available for capture.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] when a field cannot be rendered; the failure
    /// is recorded on the span and the call proceeds.
    fn fields(&self) -> Result<CapturedFields, CaptureError> {
        Ok(CapturedFields::default())
    }
}

impl TraceInput for () {
    fn arg_counts(&self) -> ArgCounts {
        ArgCounts::default()
    }
}

/// Input for calls that only report their argument counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Untyped(pub ArgCounts);

impl TraceInput for Untyped {
    fn arg_counts(&self) -> ArgCounts {
        self.0
    }
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Orchestration or validator notices.
    System,
    /// Human or proxy input.
    User,
    /// Agent replies.
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

/// A single message handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationMessage {
    /// Author role.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Optional author name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationMessage {
    /// Creates an unnamed message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

/// Arguments of an agent reply generation, as seen by an agent wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReplyRequest {
    agent_class: String,
    messages: Option<Vec<ConversationMessage>>,
    sender: Option<String>,
}

impl AgentReplyRequest {
    /// Creates a request for the given agent type.
    #[must_use]
    pub fn new(agent_class: impl Into<String>) -> Self {
        Self {
            agent_class: agent_class.into(),
            messages: None,
            sender: None,
        }
    }

    /// Attaches the message list.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ConversationMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Attaches the sender name.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Returns the supplied messages.
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        self.messages.as_deref().unwrap_or_default()
    }
}

impl TraceInput for AgentReplyRequest {
    fn arg_counts(&self) -> ArgCounts {
        let named = usize::from(self.messages.is_some()) + usize::from(self.sender.is_some());
        ArgCounts::new(1, named)
    }

    fn fields(&self) -> Result<CapturedFields, CaptureError> {
        let messages = self
            .messages
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| CaptureError::Serialization {
                what: "messages",
                reason: err.to_string(),
            })?;

        Ok(CapturedFields {
            receiver: Some(self.agent_class.clone()),
            messages,
            sender: self.sender.clone(),
            ..CapturedFields::default()
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Receiver,
    Text,
    Messages,
    Sender,
    AgentName,
}

impl Field {
    fn select(self, fields: &CapturedFields) -> Option<&str> {
        match self {
            Self::Receiver => fields.receiver.as_deref(),
            Self::Text => fields.text.as_deref(),
            Self::Messages => fields.messages.as_deref(),
            Self::Sender => fields.sender.as_deref(),
            Self::AgentName => fields.agent_name.as_deref(),
        }
    }
}

struct FieldRule {
    field: Field,
    key: &'static str,
    limit: usize,
}

const fn rule(field: Field, key: &'static str, limit: usize) -> FieldRule {
    FieldRule { field, key, limit }
}

const CAPTURE_RULES: &[(&str, &[FieldRule])] = &[
    (
        operation::AGENT_REPLY,
        &[
            rule(Field::Receiver, "agent.self_class", limits::IDENTIFIER),
            rule(Field::Messages, "input.messages", limits::COMPOSITE),
            rule(Field::Sender, "input.sender", limits::IDENTIFIER),
        ],
    ),
    (
        operation::CONTENT_MODERATION,
        &[rule(Field::Text, "input.content", limits::SINGLE_VALUE)],
    ),
    (
        operation::OUTPUT_VALIDATION,
        &[
            rule(Field::Text, "input.raw_output", limits::SINGLE_VALUE),
            rule(Field::AgentName, "input.agent_name", limits::IDENTIFIER),
        ],
    ),
    (
        operation::SELF_CORRECTION,
        &[
            rule(Field::Text, "input.raw_output", limits::SINGLE_VALUE),
            rule(Field::AgentName, "input.agent_name", limits::IDENTIFIER),
        ],
    ),
];

fn rules_for(operation: &str) -> &'static [FieldRule] {
    CAPTURE_RULES
        .iter()
        .find(|(name, _)| *name == operation)
        .map_or(&[], |(_, rules)| rules)
}

/// Returns the longest prefix of `value` holding at most `max_chars` characters.
#[must_use]
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &value[..byte_index],
        None => value,
    }
}

pub(crate) fn record_input<I>(span: &mut ActiveSpan, operation: &str, input: &I)
where
    I: TraceInput + ?Sized,
{
    let counts = input.arg_counts();
    span.set_attribute(keys::OPERATION, operation);
    span.set_attribute(keys::POSITIONAL_ARGS, counts.positional);
    span.set_attribute(keys::NAMED_ARGS, counts.named);

    let rules = rules_for(operation);
    if rules.is_empty() {
        return;
    }

    match input.fields() {
        Ok(fields) => {
            for rule in rules {
                if let Some(value) = rule.field.select(&fields) {
                    span.set_attribute(rule.key, truncate(value, rule.limit));
                }
            }
        }
        Err(err) => span.set_attribute(keys::INPUT_CAPTURE_ERROR, err.to_string()),
    }
}

/// Error recorded on a span when the traced operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    kind: String,
    message: String,
    causes: Vec<String>,
}

impl ErrorDetails {
    /// Captures type name, message, and `source()` chain of an error.
    #[must_use]
    pub fn capture<E>(error: &E) -> Self
    where
        E: StdError + 'static,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: short_type_name(std::any::type_name::<E>()).to_owned(),
            message: error.to_string(),
            causes,
        }
    }

    /// Returns the error type name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Rendered form of a successful return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    /// Rendered value (not yet truncated).
    pub value: String,
    /// Rust type name of the value.
    pub type_name: &'static str,
}

/// Outcome of an instrumented call.
///
/// Calls that cannot fail implement only [`TraceOutput::render`].
pub trait TraceOutput {
    /// Returns error details when the call failed.
    fn failure(&self) -> Option<ErrorDetails> {
        None
    }

    /// Renders the successful value, or `None` when there is nothing to show.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] when the value cannot be rendered.
    fn render(&self) -> Result<Option<RenderedOutput>, CaptureError>;
}

impl<T, E> TraceOutput for Result<T, E>
where
    T: Serialize,
    E: StdError + 'static,
{
    fn failure(&self) -> Option<ErrorDetails> {
        self.as_ref().err().map(ErrorDetails::capture)
    }

    fn render(&self) -> Result<Option<RenderedOutput>, CaptureError> {
        match self {
            Ok(value) => render_serialized(value),
            Err(_) => Ok(None),
        }
    }
}

impl TraceOutput for () {
    fn render(&self) -> Result<Option<RenderedOutput>, CaptureError> {
        Ok(None)
    }
}

/// Renders any serializable value as a span output; `null` renders as `None`.
///
/// # Errors
///
/// Returns [`CaptureError::Serialization`] when serialization fails.
pub fn render_serialized<T>(value: &T) -> Result<Option<RenderedOutput>, CaptureError>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_value(value).map_err(|err| CaptureError::Serialization {
        what: "result",
        reason: err.to_string(),
    })?;

    let rendered = match json {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    };

    Ok(Some(RenderedOutput {
        value: rendered,
        type_name: std::any::type_name::<T>(),
    }))
}

pub(crate) fn record_outcome<O>(span: &mut ActiveSpan, output: &O) -> SpanStatus
where
    O: TraceOutput + ?Sized,
{
    if let Some(details) = output.failure() {
        span.set_attribute(keys::STATUS, "error");
        span.set_attribute(keys::ERROR_TYPE, details.kind.clone());
        span.set_attribute(keys::ERROR_MESSAGE, details.message.clone());

        let mut event = vec![
            ("exception.type", details.kind.clone()),
            ("exception.message", details.message.clone()),
        ];
        if !details.causes.is_empty() {
            event.push(("exception.causes", details.causes.join(" <- ")));
        }
        span.add_event("exception", event);
        return SpanStatus::Error;
    }

    span.set_attribute(keys::STATUS, "success");
    match output.render() {
        Ok(Some(rendered)) => {
            span.set_attribute(keys::OUTPUT_RESULT, truncate(&rendered.value, limits::RESULT));
            span.set_attribute(keys::OUTPUT_TYPE, rendered.type_name);
        }
        Ok(None) => {}
        Err(err) => span.set_attribute(keys::OUTPUT_CAPTURE_ERROR, err.to_string()),
    }
    SpanStatus::Ok
}

fn short_type_name(full: &str) -> &str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::AttributeValue;

    struct BrokenInput;

    impl TraceInput for BrokenInput {
        fn arg_counts(&self) -> ArgCounts {
            ArgCounts::new(2, 0)
        }

        fn fields(&self) -> Result<CapturedFields, CaptureError> {
            Err(CaptureError::Unavailable {
                field: "text",
                reason: "stream already consumed".into(),
            })
        }
    }

    fn attr<'a>(span: &'a ActiveSpan, key: &str) -> Option<&'a str> {
        span.attribute(key).and_then(AttributeValue::as_str)
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("市场分析报告", 4), "市场分析");
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn agent_reply_rules_capture_messages_and_sender() {
        let request = AgentReplyRequest::new("ResearchAgent")
            .with_messages(vec![ConversationMessage::new(MessageRole::User, "analyse EV market")])
            .with_sender("UserProxy");

        let mut span = ActiveSpan::start(operation::AGENT_REPLY, None);
        record_input(&mut span, operation::AGENT_REPLY, &request);

        assert_eq!(attr(&span, "agent.self_class"), Some("ResearchAgent"));
        assert_eq!(attr(&span, "input.sender"), Some("UserProxy"));
        assert!(attr(&span, "input.messages").unwrap().contains("analyse EV market"));
        assert_eq!(span.attribute(keys::NAMED_ARGS), Some(&AttributeValue::Int(2)));
    }

    #[test]
    fn unknown_operations_only_get_baseline_attributes() {
        let mut span = ActiveSpan::start("setup_agents", None);
        record_input(&mut span, "setup_agents", &BrokenInput);

        assert_eq!(attr(&span, keys::OPERATION), Some("setup_agents"));
        assert_eq!(span.attribute(keys::POSITIONAL_ARGS), Some(&AttributeValue::Int(2)));
        assert!(span.attribute(keys::INPUT_CAPTURE_ERROR).is_none());
    }

    #[test]
    fn failed_field_capture_is_recorded_not_raised() {
        let mut span = ActiveSpan::start(operation::CONTENT_MODERATION, None);
        record_input(&mut span, operation::CONTENT_MODERATION, &BrokenInput);

        assert!(attr(&span, keys::INPUT_CAPTURE_ERROR).unwrap().contains("stream already consumed"));
    }

    #[test]
    fn error_outcome_records_exception_event() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
        let output: Result<u32, std::io::Error> = Err(err);

        let mut span = ActiveSpan::start("op", None);
        let status = record_outcome(&mut span, &output);

        assert_eq!(status, SpanStatus::Error);
        assert_eq!(attr(&span, keys::ERROR_TYPE), Some("Error"));
        assert_eq!(attr(&span, keys::ERROR_MESSAGE), Some("upstream timed out"));
    }

    #[test]
    fn success_outcome_truncates_rendered_value() {
        let output: Result<String, std::io::Error> = Ok("x".repeat(1_500));
        let mut span = ActiveSpan::start("op", None);
        let status = record_outcome(&mut span, &output);

        assert_eq!(status, SpanStatus::Ok);
        assert_eq!(attr(&span, keys::OUTPUT_RESULT).unwrap().chars().count(), limits::RESULT);
        assert_eq!(attr(&span, keys::OUTPUT_TYPE), Some("alloc::string::String"));
    }

    #[test]
    fn null_results_are_not_rendered() {
        let output: Result<Option<u8>, std::io::Error> = Ok(None);
        let mut span = ActiveSpan::start("op", None);
        record_outcome(&mut span, &output);
        assert!(span.attribute(keys::OUTPUT_RESULT).is_none());
    }

    #[test]
    fn short_type_name_strips_paths_and_generics() {
        assert_eq!(short_type_name("std::io::error::Error"), "Error");
        assert_eq!(short_type_name("my_crate::Wrapper<alloc::string::String>"), "Wrapper");
    }
}
