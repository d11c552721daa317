//! Telemetry lifecycle: exporter selection, processor wiring, shutdown.

use std::sync::Arc;

use agent_config::ObservabilityConfig;
use tokio::sync::OnceCell;
use tracing::info;

use crate::processor::{
    BatchConfig, BatchSpanProcessor, ExportMetricsSnapshot, LogProcessor, SpanProcessor,
};
use crate::resource::Resource;
use crate::router::{
    ActiveExporter, ExporterFactory, ExporterRouter, OtlpExporterFactory, fallback_address,
};
use crate::tracer::Tracer;

struct TelemetryState {
    tracer: Tracer,
    active: Option<ActiveExporter>,
    batch: Option<Arc<BatchSpanProcessor>>,
    processors: Vec<Arc<dyn SpanProcessor>>,
}

/// Owns the tracer and exporter pipeline for one process or component.
///
/// Nothing happens until [`Telemetry::initialize`] is awaited; repeated
/// initialization returns the tracer built the first time.
pub struct Telemetry {
    config: ObservabilityConfig,
    factory: Arc<dyn ExporterFactory>,
    extra_processors: Vec<Arc<dyn SpanProcessor>>,
    state: OnceCell<TelemetryState>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("active_exporter", &self.active_exporter())
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    /// Creates an uninitialized telemetry pipeline exporting over OTLP.
    #[must_use]
    pub fn new(config: ObservabilityConfig) -> Self {
        let factory = OtlpExporterFactory::new(Resource::from_config(&config), config.connect_timeout());
        Self {
            config,
            factory: Arc::new(factory),
            extra_processors: Vec::new(),
            state: OnceCell::new(),
        }
    }

    /// Replaces the factory used to connect exporter endpoints.
    #[must_use]
    pub fn with_exporter_factory(mut self, factory: Arc<dyn ExporterFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Adds a processor that receives every closed span.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn SpanProcessor>) -> Self {
        self.extra_processors.push(processor);
        self
    }

    /// Returns the observability settings.
    #[must_use]
    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    /// Selects an exporter and builds the tracer. Idempotent.
    pub async fn initialize(&self) -> Tracer {
        self.state
            .get_or_init(|| self.build_state())
            .await
            .tracer
            .clone()
    }

    /// Returns the tracer, or a disabled tracer before initialization.
    #[must_use]
    pub fn tracer(&self) -> Tracer {
        self.state
            .get()
            .map(|state| state.tracer.clone())
            .unwrap_or_default()
    }

    /// Returns `true` once [`Telemetry::initialize`] has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Returns the selected exporter, if any.
    #[must_use]
    pub fn active_exporter(&self) -> Option<&ActiveExporter> {
        self.state.get().and_then(|state| state.active.as_ref())
    }

    /// Returns export counters when an exporter is active.
    #[must_use]
    pub fn export_metrics(&self) -> Option<ExportMetricsSnapshot> {
        self.state
            .get()
            .and_then(|state| state.batch.as_ref())
            .map(|batch| batch.metrics().snapshot())
    }

    /// Flushes every processor.
    pub async fn force_flush(&self) {
        if let Some(state) = self.state.get() {
            for processor in &state.processors {
                processor.force_flush().await;
            }
        }
    }

    /// Flushes and stops every processor.
    pub async fn shutdown(&self) {
        if let Some(state) = self.state.get() {
            for processor in &state.processors {
                processor.shutdown().await;
            }
            info!("telemetry shut down");
        }
    }

    async fn build_state(&self) -> TelemetryState {
        if !self.config.enable_tracing {
            info!("tracing disabled by configuration");
            return TelemetryState {
                tracer: Tracer::disabled(),
                active: None,
                batch: None,
                processors: Vec::new(),
            };
        }

        let primary = self.config.otel_endpoint.as_str();
        let fallback = if self.config.enable_exporter_fallback {
            fallback_address(primary, self.config.otel_fallback_port)
        } else {
            None
        };

        let active = ExporterRouter::new(Arc::clone(&self.factory))
            .with_protocols(self.config.otel_protocol, self.config.otel_fallback_protocol)
            .resolve(primary, fallback.as_deref(), self.config.enable_exporter_fallback)
            .await;

        let mut processors: Vec<Arc<dyn SpanProcessor>> = vec![Arc::new(LogProcessor)];
        processors.extend(self.extra_processors.iter().cloned());

        let batch = active.as_ref().map(|active| {
            Arc::new(BatchSpanProcessor::spawn(
                active.exporter(),
                BatchConfig::from_config(&self.config),
            ))
        });
        if let Some(batch) = &batch {
            processors.push(batch.clone());
        }

        let mut builder = Tracer::builder(Resource::from_config(&self.config));
        for processor in &processors {
            builder = builder.with_processor(Arc::clone(processor));
        }

        info!(
            service = %self.config.service_name,
            exporter = ?active.as_ref().map(|active| active.endpoint().to_string()),
            "telemetry initialized"
        );

        TelemetryState {
            tracer: builder.build(),
            active,
            batch,
            processors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::exporter::{ExportError, ExporterEndpoint, InMemoryExporter, SpanExporter};
    use crate::processor::SpanRecorder;

    struct CountingFactory {
        exporter: Arc<InMemoryExporter>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExporterFactory for CountingFactory {
        async fn connect(
            &self,
            _endpoint: &ExporterEndpoint,
        ) -> Result<Arc<dyn SpanExporter>, ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.exporter.clone())
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let factory = Arc::new(CountingFactory {
            exporter: Arc::new(InMemoryExporter::new()),
            calls: AtomicUsize::new(0),
        });
        let telemetry =
            Telemetry::new(ObservabilityConfig::default()).with_exporter_factory(factory.clone());

        assert!(!telemetry.tracer().is_enabled());
        let first = telemetry.initialize().await;
        let second = telemetry.initialize().await;

        assert!(first.is_enabled() && second.is_enabled());
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert!(telemetry.is_initialized());
    }

    #[tokio::test]
    async fn spans_reach_the_exporter_on_shutdown() {
        let exporter = Arc::new(InMemoryExporter::new());
        let factory = Arc::new(CountingFactory {
            exporter: exporter.clone(),
            calls: AtomicUsize::new(0),
        });
        let telemetry =
            Telemetry::new(ObservabilityConfig::default()).with_exporter_factory(factory);

        let tracer = telemetry.initialize().await;
        let span = tracer.start_span("custom", [("k", 1_i64)]).unwrap();
        tracer.end_span(span, crate::span::SpanStatus::Ok);
        telemetry.shutdown().await;

        assert_eq!(exporter.spans().len(), 1);
        assert_eq!(telemetry.export_metrics().unwrap().spans_exported, 1);
    }

    #[tokio::test]
    async fn disabled_config_yields_disabled_tracer() {
        let config = ObservabilityConfig {
            enable_tracing: false,
            ..ObservabilityConfig::default()
        };
        let recorder = Arc::new(SpanRecorder::default());
        let telemetry = Telemetry::new(config).with_processor(recorder.clone());

        let tracer = telemetry.initialize().await;
        assert!(!tracer.is_enabled());
        assert!(telemetry.active_exporter().is_none());
        assert!(recorder.is_empty());
    }
}
