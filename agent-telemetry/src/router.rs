//! Selection of the active span exporter.
//!
//! Collectors commonly listen on 4317 (gRPC) and 4318 (HTTP); a port
//! conflict or a missing collector must never break the traced program.
//! The router tries the primary endpoint, then an optional fallback, and
//! otherwise disables export. Selection happens once.

use std::sync::Arc;
use std::time::Duration;

use agent_config::OtlpProtocol;
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::exporter::{
    ExportError, ExporterEndpoint, OtlpGrpcExporter, OtlpHttpExporter, SpanExporter,
};
use crate::resource::Resource;

/// Builds a connected exporter for an endpoint.
#[async_trait]
pub trait ExporterFactory: Send + Sync {
    /// Connects to `endpoint` using its protocol.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] when the endpoint is invalid or unreachable.
    async fn connect(&self, endpoint: &ExporterEndpoint)
    -> Result<Arc<dyn SpanExporter>, ExportError>;
}

/// Which configured endpoint ended up active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterRole {
    /// The primary endpoint.
    Primary,
    /// The fallback endpoint.
    Fallback,
}

/// The exporter chosen by [`ExporterRouter::resolve`].
#[derive(Clone)]
pub struct ActiveExporter {
    endpoint: ExporterEndpoint,
    role: ExporterRole,
    exporter: Arc<dyn SpanExporter>,
}

impl std::fmt::Debug for ActiveExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveExporter")
            .field("endpoint", &self.endpoint.to_string())
            .field("role", &self.role)
            .field("exporter", &self.exporter.name())
            .finish()
    }
}

impl ActiveExporter {
    /// Returns the selected endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &ExporterEndpoint {
        &self.endpoint
    }

    /// Returns whether the primary or fallback endpoint was selected.
    #[must_use]
    pub const fn role(&self) -> ExporterRole {
        self.role
    }

    /// Returns the connected exporter.
    #[must_use]
    pub fn exporter(&self) -> Arc<dyn SpanExporter> {
        Arc::clone(&self.exporter)
    }
}

/// Chooses between a primary and a fallback exporter endpoint.
#[derive(Clone)]
pub struct ExporterRouter {
    factory: Arc<dyn ExporterFactory>,
    primary_protocol: OtlpProtocol,
    fallback_protocol: OtlpProtocol,
}

impl std::fmt::Debug for ExporterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterRouter")
            .field("primary_protocol", &self.primary_protocol)
            .field("fallback_protocol", &self.fallback_protocol)
            .finish_non_exhaustive()
    }
}

impl ExporterRouter {
    /// Creates a router using `factory` to connect endpoints.
    ///
    /// The primary endpoint speaks gRPC and the fallback OTLP/HTTP until
    /// [`ExporterRouter::with_protocols`] says otherwise.
    #[must_use]
    pub fn new(factory: Arc<dyn ExporterFactory>) -> Self {
        Self {
            factory,
            primary_protocol: OtlpProtocol::Grpc,
            fallback_protocol: OtlpProtocol::HttpProtobuf,
        }
    }

    /// Sets the protocol expected at each endpoint.
    #[must_use]
    pub const fn with_protocols(mut self, primary: OtlpProtocol, fallback: OtlpProtocol) -> Self {
        self.primary_protocol = primary;
        self.fallback_protocol = fallback;
        self
    }

    /// Resolves the active exporter.
    ///
    /// Returns `None` when no endpoint could be connected; this is logged as
    /// a warning and never treated as an error.
    pub async fn resolve(
        &self,
        primary: &str,
        fallback: Option<&str>,
        fallback_enabled: bool,
    ) -> Option<ActiveExporter> {
        match self.attempt(primary, ExporterRole::Primary).await {
            Ok(active) => return Some(active),
            Err(err) => warn!(endpoint = primary, %err, "primary span exporter unavailable"),
        }

        let fallback = match fallback {
            Some(address) if fallback_enabled => address,
            _ => {
                warn!("span export disabled: no usable exporter endpoint");
                return None;
            }
        };

        match self.attempt(fallback, ExporterRole::Fallback).await {
            Ok(active) => Some(active),
            Err(err) => {
                warn!(endpoint = fallback, %err, "fallback span exporter unavailable; span export disabled");
                None
            }
        }
    }

    async fn attempt(
        &self,
        address: &str,
        role: ExporterRole,
    ) -> Result<ActiveExporter, ExportError> {
        let protocol = match role {
            ExporterRole::Primary => self.primary_protocol,
            ExporterRole::Fallback => self.fallback_protocol,
        };
        let endpoint = ExporterEndpoint::parse(address)?.with_protocol(protocol);
        let exporter = self.factory.connect(&endpoint).await?;
        info!(
            endpoint = %endpoint,
            %protocol,
            ?role,
            exporter = exporter.name(),
            "span exporter connected"
        );
        Ok(ActiveExporter {
            endpoint,
            role,
            exporter,
        })
    }
}

/// Derives the fallback address by replacing the primary's port.
///
/// Returns `None` if the primary address does not parse.
#[must_use]
pub fn fallback_address(primary: &str, port: u16) -> Option<String> {
    ExporterEndpoint::parse(primary)
        .ok()
        .map(|endpoint| endpoint.with_port(port).to_string())
}

/// Builds OTLP exporters and accepts an endpoint only after it answered
/// an empty export request in its configured protocol.
#[derive(Debug, Clone)]
pub struct OtlpExporterFactory {
    resource: Arc<Resource>,
    connect_timeout: Duration,
    export_timeout: Duration,
}

impl OtlpExporterFactory {
    /// Default timeout for a single export request.
    pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a factory attaching `resource` to every batch.
    ///
    /// `connect_timeout` bounds connecting to an endpoint and its first empty export.
    #[must_use]
    pub fn new(resource: Resource, connect_timeout: Duration) -> Self {
        Self {
            resource: Arc::new(resource),
            connect_timeout,
            export_timeout: Self::DEFAULT_EXPORT_TIMEOUT,
        }
    }

    /// Overrides the per-export request timeout.
    #[must_use]
    pub const fn with_export_timeout(mut self, export_timeout: Duration) -> Self {
        self.export_timeout = export_timeout;
        self
    }

    async fn verified(
        &self,
        endpoint: &ExporterEndpoint,
    ) -> Result<Arc<dyn SpanExporter>, ExportError> {
        let resource = Arc::clone(&self.resource);
        match endpoint.protocol() {
            OtlpProtocol::Grpc => {
                let exporter = OtlpGrpcExporter::connect(
                    endpoint,
                    resource,
                    self.connect_timeout,
                    self.export_timeout,
                )
                .await?;
                exporter.handshake().await?;
                Ok(Arc::new(exporter))
            }
            OtlpProtocol::HttpProtobuf => {
                let exporter = OtlpHttpExporter::new(endpoint, resource, self.export_timeout)?;
                exporter.handshake().await?;
                Ok(Arc::new(exporter))
            }
        }
    }
}

#[async_trait]
impl ExporterFactory for OtlpExporterFactory {
    async fn connect(
        &self,
        endpoint: &ExporterEndpoint,
    ) -> Result<Arc<dyn SpanExporter>, ExportError> {
        let unreachable = |reason: String| ExportError::Unreachable {
            address: endpoint.to_string(),
            reason,
        };

        match timeout(self.connect_timeout, self.verified(endpoint)).await {
            Ok(Ok(exporter)) => Ok(exporter),
            Ok(Err(ExportError::Transport(reason))) => Err(unreachable(format!(
                "no OTLP {} collector answered: {reason}",
                endpoint.protocol()
            ))),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(unreachable(format!(
                "no answer within {:?}",
                self.connect_timeout
            ))),
        }
    }
}
