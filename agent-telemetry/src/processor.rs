//! Span processors: sinks invoked for every closed span.
//!
//! Processors run synchronously on the instrumented call's task, so
//! `on_end` must never block. The [`BatchSpanProcessor`] hands spans to a
//! background worker through a bounded channel and drops them when the
//! queue is full rather than slowing the traced operation down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agent_config::ObservabilityConfig;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::exporter::SpanExporter;
use crate::span::Span;

/// Receives closed spans.
#[async_trait]
pub trait SpanProcessor: Send + Sync {
    /// Called once per closed span. Must not block.
    fn on_end(&self, span: &Span);

    /// Pushes any buffered spans downstream.
    async fn force_flush(&self) {}

    /// Flushes and releases resources. Spans ended afterwards are discarded.
    async fn shutdown(&self) {}
}

/// Writes each closed span as a structured debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProcessor;

#[async_trait]
impl SpanProcessor for LogProcessor {
    fn on_end(&self, span: &Span) {
        debug!(
            target: "agent_telemetry::span",
            trace_id = %span.trace_id(),
            span_id = %span.span_id(),
            parent_span_id = ?span.parent_span_id().map(|id| id.to_string()),
            name = span.name(),
            status = ?span.status(),
            duration_us = u64::try_from(span.duration().as_micros()).unwrap_or(u64::MAX),
            attributes = ?span.attributes(),
            "span closed"
        );
    }
}

/// Keeps the most recent closed spans in memory for local inspection.
#[derive(Debug)]
pub struct SpanRecorder {
    capacity: usize,
    spans: Mutex<VecDeque<Span>>,
}

impl SpanRecorder {
    /// Default number of retained spans.
    pub const DEFAULT_CAPACITY: usize = 4_096;

    /// Creates a recorder retaining at most `capacity` spans.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            spans: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns all retained spans, oldest first.
    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        self.lock().iter().cloned().collect()
    }

    /// Returns retained spans with the given operation name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<Span> {
        self.lock()
            .iter()
            .filter(|span| span.name() == name)
            .cloned()
            .collect()
    }

    /// Returns the number of retained spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discards all retained spans.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Span>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SpanRecorder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl SpanProcessor for SpanRecorder {
    fn on_end(&self, span: &Span) {
        let mut spans = self.lock();
        if spans.len() == self.capacity {
            spans.pop_front();
        }
        spans.push_back(span.clone());
    }
}

/// Batching parameters for [`BatchSpanProcessor`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Spans per export call.
    pub max_batch_size: usize,
    /// Flush interval for partially filled batches.
    pub scheduled_delay: Duration,
    /// Capacity of the hand-off queue.
    pub max_queue_size: usize,
}

impl BatchConfig {
    /// Derives batching parameters from observability settings.
    #[must_use]
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self {
            max_batch_size: config.export_batch_size.max(1),
            scheduled_delay: config.export_interval(),
            max_queue_size: config.export_queue_capacity.max(1),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_config(&ObservabilityConfig::default())
    }
}

/// Export counters shared between the processor and its worker.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_errors: AtomicU64,
    spans_dropped: AtomicU64,
}

/// Point-in-time copy of [`ExportMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportMetricsSnapshot {
    /// Spans delivered successfully.
    pub spans_exported: u64,
    /// Batches delivered successfully.
    pub batches_exported: u64,
    /// Failed export calls.
    pub export_errors: u64,
    /// Spans discarded because the queue was full or closed.
    pub spans_dropped: u64,
}

impl ExportMetrics {
    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> ExportMetricsSnapshot {
        ExportMetricsSnapshot {
            spans_exported: self.spans_exported.load(Ordering::Relaxed),
            batches_exported: self.batches_exported.load(Ordering::Relaxed),
            export_errors: self.export_errors.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.spans_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

enum BatchCommand {
    Export(Box<Span>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Queues closed spans and exports them in batches from a background task.
pub struct BatchSpanProcessor {
    sender: mpsc::Sender<BatchCommand>,
    metrics: Arc<ExportMetrics>,
}

impl std::fmt::Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl BatchSpanProcessor {
    /// Spawns the export worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
        let metrics = Arc::new(ExportMetrics::default());
        tokio::spawn(run_worker(receiver, exporter, config, Arc::clone(&metrics)));
        Self { sender, metrics }
    }

    /// Returns the shared export counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ExportMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> BatchCommand) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(command(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

#[async_trait]
impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: &Span) {
        if self
            .sender
            .try_send(BatchCommand::Export(Box::new(span.clone())))
            .is_err()
        {
            self.metrics.record_drop();
        }
    }

    async fn force_flush(&self) {
        self.request(BatchCommand::Flush).await;
    }

    async fn shutdown(&self) {
        self.request(BatchCommand::Shutdown).await;
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<BatchCommand>,
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    metrics: Arc<ExportMetrics>,
) {
    let mut buffer: Vec<Span> = Vec::with_capacity(config.max_batch_size);
    let delay = config.scheduled_delay.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(BatchCommand::Export(span)) => {
                    buffer.push(*span);
                    if buffer.len() >= config.max_batch_size {
                        export_batch(exporter.as_ref(), &mut buffer, &metrics).await;
                    }
                }
                Some(BatchCommand::Flush(ack)) => {
                    export_batch(exporter.as_ref(), &mut buffer, &metrics).await;
                    let _ = ack.send(());
                }
                Some(BatchCommand::Shutdown(ack)) => {
                    receiver.close();
                    let mut acks = vec![ack];
                    while let Ok(command) = receiver.try_recv() {
                        match command {
                            BatchCommand::Export(span) => buffer.push(*span),
                            BatchCommand::Flush(ack) | BatchCommand::Shutdown(ack) => acks.push(ack),
                        }
                    }
                    export_batch(exporter.as_ref(), &mut buffer, &metrics).await;
                    for ack in acks {
                        let _ = ack.send(());
                    }
                    break;
                }
                None => {
                    export_batch(exporter.as_ref(), &mut buffer, &metrics).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                export_batch(exporter.as_ref(), &mut buffer, &metrics).await;
            }
        }
    }
    debug!(exporter = exporter.name(), "span export worker stopped");
}

async fn export_batch(exporter: &dyn SpanExporter, buffer: &mut Vec<Span>, metrics: &ExportMetrics) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let count = u64::try_from(batch.len()).unwrap_or(u64::MAX);
    match exporter.export(batch).await {
        Ok(()) => metrics.record_success(count),
        Err(err) => {
            metrics.record_error();
            warn!(exporter = exporter.name(), %err, spans = count, "span export failed");
        }
    }
}
