//! Tracing, span export, and exporter routing for guarded agents.
//!
//! The [`Tracer`] wraps units of work with spans, capturing typed inputs
//! and outputs per operation. Closed spans flow to [`SpanProcessor`]s; the
//! [`Telemetry`] lifecycle selects an exporter endpoint once through the
//! [`ExporterRouter`] and falls back or disables export when collectors are
//! unreachable.

#![warn(missing_docs, clippy::pedantic)]

pub mod capture;
pub mod exporter;
pub mod logging;
pub mod otlp;
pub mod processor;
pub mod resource;
pub mod router;
pub mod span;
pub mod telemetry;
pub mod tracer;

pub use capture::{
    AgentReplyRequest, ArgCounts, CaptureError, CapturedFields, ConversationMessage, ErrorDetails,
    MessageRole, RenderedOutput, TraceInput, TraceOutput, Untyped, operation, render_serialized,
};
pub use exporter::{
    ExportError, ExporterEndpoint, InMemoryExporter, OtlpGrpcExporter, OtlpHttpExporter, SpanExporter,
    Transport,
};
pub use processor::{
    BatchConfig, BatchSpanProcessor, ExportMetrics, ExportMetricsSnapshot, LogProcessor,
    SpanProcessor, SpanRecorder,
};
pub use resource::Resource;
pub use router::{
    ActiveExporter, ExporterFactory, ExporterRole, ExporterRouter, OtlpExporterFactory,
    fallback_address,
};
pub use span::{
    ActiveSpan, AttributeValue, Span, SpanContext, SpanEvent, SpanId, SpanStatus, TraceId,
};
pub use telemetry::Telemetry;
pub use tracer::{Instrumented, Tracer, TracerBuilder};
