//! Span data model.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit trace identifier shared by every span of one logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(u128);

impl TraceId {
    /// Generates a random, non-zero trace identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u128().max(1))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(u64);

impl SpanId {
    /// Generates a random, non-zero span identifier.
    #[must_use]
    pub fn random() -> Self {
        let (high, low) = Uuid::new_v4().as_u64_pair();
        Self((high ^ low).max(1))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for SpanId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of an open span, inherited by spans opened beneath it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
}

impl SpanContext {
    /// Returns the trace identifier.
    #[must_use]
    pub const fn trace_id(self) -> TraceId {
        self.trace_id
    }

    /// Returns the span identifier.
    #[must_use]
    pub const fn span_id(self) -> SpanId {
        self.span_id
    }
}

/// Attribute value types for span metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// UTF-8 string.
    String(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
}

impl AttributeValue {
    /// Returns the string payload, if this is a string attribute.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer attribute.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a float attribute.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Int(value) => Display::fmt(value, f),
            Self::Float(value) => Display::fmt(value, f),
            Self::Bool(value) => Display::fmt(value, f),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Final status of a closed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// The operation returned normally.
    Ok,
    /// The operation returned an error.
    Error,
}

/// Timestamped event recorded on a span (e.g. an exception).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    name: String,
    time_unix_nanos: u64,
    attributes: BTreeMap<String, AttributeValue>,
}

impl SpanEvent {
    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the wall-clock timestamp in Unix nanoseconds.
    #[must_use]
    pub const fn time_unix_nanos(&self) -> u64 {
        self.time_unix_nanos
    }

    /// Returns the event attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }
}

/// A span that is still open and owned by the instrumented call frame.
#[derive(Debug)]
pub struct ActiveSpan {
    context: SpanContext,
    parent_span_id: Option<SpanId>,
    name: String,
    start_unix_nanos: u64,
    started: Instant,
    attributes: BTreeMap<String, AttributeValue>,
    events: Vec<SpanEvent>,
}

impl ActiveSpan {
    /// Opens a span, joining the parent's trace when one is supplied.
    #[must_use]
    pub fn start(name: impl Into<String>, parent: Option<SpanContext>) -> Self {
        let trace_id = parent.map_or_else(TraceId::random, SpanContext::trace_id);
        Self {
            context: SpanContext {
                trace_id,
                span_id: SpanId::random(),
            },
            parent_span_id: parent.map(SpanContext::span_id),
            name: name.into(),
            start_unix_nanos: unix_nanos_now(),
            started: Instant::now(),
            attributes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Returns the span's identity.
    #[must_use]
    pub const fn context(&self) -> SpanContext {
        self.context
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the time elapsed since the span was opened.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sets or replaces an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Returns an attribute recorded so far.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Appends a timestamped event.
    pub fn add_event<I, K, V>(&mut self, name: impl Into<String>, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.events.push(SpanEvent {
            name: name.into(),
            time_unix_nanos: unix_nanos_now(),
            attributes: attributes
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        });
    }

    /// Closes the span, measuring its duration now.
    #[must_use]
    pub fn finish(self, status: SpanStatus) -> Span {
        let duration = self.elapsed();
        self.close(status, duration)
    }

    pub(crate) fn close(self, status: SpanStatus, duration: Duration) -> Span {
        Span {
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            start_unix_nanos: self.start_unix_nanos,
            duration_nanos: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            status,
            attributes: self.attributes,
            events: self.events,
        }
    }
}

/// A closed, immutable span ready for processing and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    name: String,
    start_unix_nanos: u64,
    duration_nanos: u64,
    status: SpanStatus,
    attributes: BTreeMap<String, AttributeValue>,
    events: Vec<SpanEvent>,
}

impl Span {
    /// Returns the trace identifier.
    #[must_use]
    pub const fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the span identifier.
    #[must_use]
    pub const fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns the parent span identifier, if any.
    #[must_use]
    pub const fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the start timestamp in Unix nanoseconds.
    #[must_use]
    pub const fn start_unix_nanos(&self) -> u64 {
        self.start_unix_nanos
    }

    /// Returns the end timestamp in Unix nanoseconds.
    #[must_use]
    pub const fn end_unix_nanos(&self) -> u64 {
        self.start_unix_nanos.saturating_add(self.duration_nanos)
    }

    /// Returns the measured duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos)
    }

    /// Returns the final status.
    #[must_use]
    pub const fn status(&self) -> SpanStatus {
        self.status
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Returns a single attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Returns recorded events.
    #[must_use]
    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }
}

fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}
