//! The [`Tracer`] context object and higher-order instrumentation.
//!
//! A tracer is either disabled, in which case every wrapped call runs
//! untouched, or carries a resource description and a list of
//! [`SpanProcessor`]s that receive each closed span. The innermost open
//! span is tracked per task, so nested instrumented calls join the same
//! trace without any global state.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::capture::{self, MessageRole, TraceInput, TraceOutput, keys, operation};
use crate::processor::SpanProcessor;
use crate::resource::Resource;
use crate::span::{ActiveSpan, AttributeValue, Span, SpanContext, SpanStatus};

const CONVERSATION_PREVIEW_CHARS: usize = 200;

tokio::task_local! {
    static CURRENT_SPAN: SpanContext;
}

struct TracerInner {
    resource: Resource,
    processors: Vec<Arc<dyn SpanProcessor>>,
}

/// Creates spans around units of work and dispatches them to processors.
///
/// Cloning is cheap; all clones share the same processors.
#[derive(Clone, Default)]
pub struct Tracer {
    inner: Option<Arc<TracerInner>>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Tracer")
                .field("resource", &inner.resource)
                .field("processors", &inner.processors.len())
                .finish(),
            None => f.write_str("Tracer(disabled)"),
        }
    }
}

/// Builder for an enabled [`Tracer`].
pub struct TracerBuilder {
    resource: Resource,
    processors: Vec<Arc<dyn SpanProcessor>>,
}

impl TracerBuilder {
    /// Adds a processor; processors are invoked in insertion order.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn SpanProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Finishes the tracer.
    #[must_use]
    pub fn build(self) -> Tracer {
        Tracer {
            inner: Some(Arc::new(TracerInner {
                resource: self.resource,
                processors: self.processors,
            })),
        }
    }
}

impl Tracer {
    /// Returns a tracer that never records anything.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    /// Starts building an enabled tracer.
    #[must_use]
    pub fn builder(resource: Resource) -> TracerBuilder {
        TracerBuilder {
            resource,
            processors: Vec::new(),
        }
    }

    /// Returns `true` when spans are being created.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the resource of an enabled tracer.
    #[must_use]
    pub fn resource(&self) -> Option<&Resource> {
        self.inner.as_deref().map(|inner| &inner.resource)
    }

    /// Returns the innermost open span on the current task, if any.
    #[must_use]
    pub fn current_context() -> Option<SpanContext> {
        CURRENT_SPAN.try_with(|context| *context).ok()
    }

    /// Wraps `work` so that every call is traced as `operation`.
    #[must_use]
    pub fn instrument<F>(&self, operation: impl Into<String>, work: F) -> Instrumented<F> {
        Instrumented {
            tracer: self.clone(),
            operation: operation.into(),
            work,
        }
    }

    /// Traces an already-built future.
    ///
    /// The output is returned unchanged; errors are recorded on the span and
    /// handed back to the caller as-is.
    pub async fn trace<I, Fut>(&self, operation: &str, input: &I, work: Fut) -> Fut::Output
    where
        I: TraceInput + ?Sized,
        Fut: Future,
        Fut::Output: TraceOutput,
    {
        let span = self.open(operation, input);
        self.drive(span, work).await
    }

    /// Traces a synchronous closure.
    pub fn trace_blocking<I, F, T>(&self, operation: &str, input: &I, work: F) -> T
    where
        I: TraceInput + ?Sized,
        F: FnOnce() -> T,
        T: TraceOutput,
    {
        let span = self.open(operation, input);
        self.run(span, work)
    }

    /// Opens a hand-built span under the current context.
    ///
    /// Returns `None` when the tracer is disabled.
    #[must_use]
    pub fn start_span<I, K, V>(&self, name: &str, attributes: I) -> Option<ActiveSpan>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.inner.as_ref()?;
        let mut span = ActiveSpan::start(name, Self::current_context());
        for (key, value) in attributes {
            span.set_attribute(key, value);
        }
        Some(span)
    }

    /// Closes a span from [`Tracer::start_span`] and dispatches it.
    pub fn end_span(&self, span: ActiveSpan, status: SpanStatus) {
        self.dispatch(&span.finish(status));
    }

    /// Records one conversation message as an `agent_conversation` span and
    /// an info log with a preview of the message.
    ///
    /// Does nothing when the tracer is disabled.
    pub fn log_conversation(
        &self,
        agent: &str,
        message: &str,
        role: MessageRole,
        metadata: &Map<String, Value>,
    ) {
        if !self.is_enabled() {
            return;
        }

        info!(
            agent,
            %role,
            preview = capture::truncate(message, CONVERSATION_PREVIEW_CHARS),
            "conversation message"
        );

        let Some(mut span) = self.start_span(
            operation::CONVERSATION,
            [
                ("agent.name", AttributeValue::from(agent)),
                ("agent.role", AttributeValue::from(role.to_string())),
                (
                    "agent.message_length",
                    AttributeValue::from(message.chars().count()),
                ),
            ],
        ) else {
            return;
        };

        for (key, value) in metadata {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            span.set_attribute(format!("agent.meta.{key}"), rendered);
        }
        self.end_span(span, SpanStatus::Ok);
    }

    fn open<I>(&self, operation: &str, input: &I) -> Option<ActiveSpan>
    where
        I: TraceInput + ?Sized,
    {
        self.inner.as_ref()?;
        let mut span = ActiveSpan::start(operation, Self::current_context());
        capture::record_input(&mut span, operation, input);
        Some(span)
    }

    async fn drive<Fut>(&self, span: Option<ActiveSpan>, work: Fut) -> Fut::Output
    where
        Fut: Future,
        Fut::Output: TraceOutput,
    {
        let Some(span) = span else {
            return work.await;
        };
        let output = CURRENT_SPAN.scope(span.context(), work).await;
        self.close(span, &output);
        output
    }

    fn run<F, T>(&self, span: Option<ActiveSpan>, work: F) -> T
    where
        F: FnOnce() -> T,
        T: TraceOutput,
    {
        let Some(span) = span else {
            return work();
        };
        let output = CURRENT_SPAN.sync_scope(span.context(), work);
        self.close(span, &output);
        output
    }

    fn close<O>(&self, mut span: ActiveSpan, output: &O)
    where
        O: TraceOutput + ?Sized,
    {
        let duration = span.elapsed();
        let status = capture::record_outcome(&mut span, output);
        span.set_attribute(keys::DURATION_SECONDS, duration.as_secs_f64());
        self.dispatch(&span.close(status, duration));
    }

    fn dispatch(&self, span: &Span) {
        if let Some(inner) = &self.inner {
            for processor in &inner.processors {
                processor.on_end(span);
            }
        }
    }
}

/// A callable wrapped by [`Tracer::instrument`].
///
/// Calling it has the same inputs and outputs as the wrapped function.
#[derive(Debug, Clone)]
pub struct Instrumented<F> {
    tracer: Tracer,
    operation: String,
    work: F,
}

impl<F> Instrumented<F> {
    /// Returns the traced operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Invokes an async function under a span.
    pub async fn call<I, Fut>(&self, input: I) -> Fut::Output
    where
        F: Fn(I) -> Fut,
        I: TraceInput,
        Fut: Future,
        Fut::Output: TraceOutput,
    {
        let span = self.tracer.open(&self.operation, &input);
        let work = (self.work)(input);
        self.tracer.drive(span, work).await
    }

    /// Invokes a synchronous function under a span.
    pub fn call_blocking<I, T>(&self, input: I) -> T
    where
        F: Fn(I) -> T,
        I: TraceInput,
        T: TraceOutput,
    {
        let span = self.tracer.open(&self.operation, &input);
        self.tracer.run(span, || (self.work)(input))
    }
}
