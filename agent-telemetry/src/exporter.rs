//! Span exporters and exporter endpoints.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agent_adapters::http_client::HttpTransport;
use agent_config::OtlpProtocol;
use async_trait::async_trait;
use hyper::Uri;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use thiserror::Error;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::otlp;
use crate::resource::Resource;
use crate::span::Span;

const TRACES_PATH: &str = "/v1/traces";
const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Errors raised while connecting to or exporting through a backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The endpoint address could not be parsed or lacks a host/port.
    #[error("invalid exporter endpoint `{address}`: {reason}")]
    InvalidEndpoint {
        /// Offending address.
        address: String,
        /// Explanation.
        reason: String,
    },
    /// The endpoint did not accept a connection.
    #[error("exporter endpoint {address} unreachable: {reason}")]
    Unreachable {
        /// Endpoint address.
        address: String,
        /// Underlying failure.
        reason: String,
    },
    /// A batch could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),
    /// A batch could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Transport kind, derived from the endpoint scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain-text HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Transport {
    const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    const fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// A parsed telemetry destination and the OTLP protocol it speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterEndpoint {
    transport: Transport,
    protocol: OtlpProtocol,
    host: String,
    port: u16,
    path: String,
}

impl ExporterEndpoint {
    /// Parses an `http://` or `https://` address speaking gRPC.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidEndpoint`] for unparsable addresses,
    /// other schemes, or a missing host.
    pub fn parse(address: &str) -> Result<Self, ExportError> {
        let invalid = |reason: &str| ExportError::InvalidEndpoint {
            address: address.to_owned(),
            reason: reason.to_owned(),
        };

        let uri = Uri::from_str(address.trim()).map_err(|err| invalid(&err.to_string()))?;
        let transport = match uri.scheme_str() {
            Some("http") => Transport::Http,
            Some("https") => Transport::Https,
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        };
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_owned();
        let port = uri.port_u16().unwrap_or_else(|| transport.default_port());
        let path = uri.path().trim_end_matches('/').to_owned();

        Ok(Self {
            transport,
            protocol: OtlpProtocol::Grpc,
            host,
            port,
            path,
        })
    }

    /// Returns this endpoint speaking `protocol`.
    #[must_use]
    pub fn with_protocol(self, protocol: OtlpProtocol) -> Self {
        Self { protocol, ..self }
    }

    /// Returns the OTLP protocol.
    #[must_use]
    pub const fn protocol(&self) -> OtlpProtocol {
        self.protocol
    }

    /// Returns a copy of this endpoint listening on another port.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns `host:port`, suitable for a socket connect.
    #[must_use]
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns `scheme://host:port`, the gRPC channel target.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("{}://{}", self.transport.scheme(), self.socket_address())
    }

    /// Returns the URL OTLP/HTTP batches are posted to.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidEndpoint`] if the assembled URL is invalid.
    pub fn traces_uri(&self) -> Result<Uri, ExportError> {
        let path = if self.path.ends_with(TRACES_PATH) {
            self.path.clone()
        } else {
            format!("{}{TRACES_PATH}", self.path)
        };
        let raw = format!("{}{path}", self.origin());
        Uri::from_str(&raw).map_err(|err| ExportError::InvalidEndpoint {
            address: raw.clone(),
            reason: err.to_string(),
        })
    }
}

impl Display for ExporterEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.transport.scheme(),
            self.socket_address(),
            self.path
        )
    }
}

impl FromStr for ExporterEndpoint {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Destination for batches of closed spans.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;

    /// Delivers a batch.
    async fn export(&self, spans: Vec<Span>) -> Result<(), ExportError>;
}

/// Posts OTLP protobuf batches to a collector over HTTP(S).
#[derive(Debug, Clone)]
pub struct OtlpHttpExporter {
    uri: Uri,
    resource: Arc<Resource>,
    transport: HttpTransport,
}

impl OtlpHttpExporter {
    /// Creates an exporter for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidEndpoint`] if the traces URL is invalid.
    pub fn new(
        endpoint: &ExporterEndpoint,
        resource: Arc<Resource>,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        Ok(Self {
            uri: endpoint.traces_uri()?,
            resource,
            transport: HttpTransport::new(timeout),
        })
    }

    /// Returns the URL batches are posted to.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Sends an empty export request; succeeds only if an OTLP/HTTP
    /// collector answers.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Transport`] when the request is not accepted.
    pub async fn handshake(&self) -> Result<(), ExportError> {
        self.send(&ExportTraceServiceRequest::default()).await
    }

    async fn send(&self, request: &ExportTraceServiceRequest) -> Result<(), ExportError> {
        self.transport
            .post(&self.uri, PROTOBUF_CONTENT_TYPE, otlp::encode_body(request), None)
            .await
            .map(|_| ())
            .map_err(|err| ExportError::Transport(err.to_string()))
    }
}

#[async_trait]
impl SpanExporter for OtlpHttpExporter {
    fn name(&self) -> &str {
        "otlp-http"
    }

    async fn export(&self, spans: Vec<Span>) -> Result<(), ExportError> {
        if spans.is_empty() {
            return Ok(());
        }
        self.send(&otlp::export_request(&self.resource, &spans)).await
    }
}

/// Sends OTLP batches to a collector's gRPC trace service.
#[derive(Debug, Clone)]
pub struct OtlpGrpcExporter {
    client: TraceServiceClient<Channel>,
    resource: Arc<Resource>,
}

impl OtlpGrpcExporter {
    /// Opens an HTTP/2 channel to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidEndpoint`] when the target is not a valid
    /// channel address and [`ExportError::Unreachable`] when no HTTP/2
    /// connection could be established.
    pub async fn connect(
        endpoint: &ExporterEndpoint,
        resource: Arc<Resource>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        let origin = endpoint.origin();
        let invalid = |reason: String| ExportError::InvalidEndpoint {
            address: origin.clone(),
            reason,
        };

        let mut target = Endpoint::from_shared(origin.clone())
            .map_err(|err| invalid(err.to_string()))?
            .connect_timeout(connect_timeout)
            .timeout(timeout);
        if endpoint.transport() == Transport::Https {
            target = target
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|err| invalid(err.to_string()))?;
        }

        let channel = target
            .connect()
            .await
            .map_err(|err| ExportError::Unreachable {
                address: origin.clone(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            client: TraceServiceClient::new(channel),
            resource,
        })
    }

    /// Sends an empty export request; succeeds only if the OTLP trace
    /// service answers.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Transport`] with the gRPC status otherwise.
    pub async fn handshake(&self) -> Result<(), ExportError> {
        self.send(ExportTraceServiceRequest::default()).await
    }

    async fn send(&self, request: ExportTraceServiceRequest) -> Result<(), ExportError> {
        let mut client = self.client.clone();
        client
            .export(tonic::Request::new(request))
            .await
            .map(|_| ())
            .map_err(|status| ExportError::Transport(status.to_string()))
    }
}

#[async_trait]
impl SpanExporter for OtlpGrpcExporter {
    fn name(&self) -> &str {
        "otlp-grpc"
    }

    async fn export(&self, spans: Vec<Span>) -> Result<(), ExportError> {
        if spans.is_empty() {
            return Ok(());
        }
        self.send(otlp::export_request(&self.resource, &spans)).await
    }
}

/// Exporter that keeps every batch in memory, for tests and local inspection.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    batches: Mutex<Vec<Vec<Span>>>,
}

impl InMemoryExporter {
    /// Creates an empty exporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every exported span in delivery order.
    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Returns the number of batches received.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn export(&self, spans: Vec<Span>) -> Result<(), ExportError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spans);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_and_port() {
        let endpoint = ExporterEndpoint::parse("http://localhost:4317").unwrap();
        assert_eq!(endpoint.transport(), Transport::Http);
        assert_eq!(endpoint.protocol(), OtlpProtocol::Grpc);
        assert_eq!(endpoint.origin(), "http://localhost:4317");
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 4317);
        assert_eq!(endpoint.to_string(), "http://localhost:4317");
    }

    #[test]
    fn https_defaults_to_port_443() {
        let endpoint = ExporterEndpoint::parse("https://collector.example.com").unwrap();
        assert_eq!(endpoint.transport(), Transport::Https);
        assert_eq!(endpoint.port(), 443);
    }

    #[test]
    fn rejects_unsupported_schemes_and_garbage() {
        assert!(matches!(
            ExporterEndpoint::parse("grpc://localhost:4317"),
            Err(ExportError::InvalidEndpoint { .. })
        ));
        assert!(ExporterEndpoint::parse("not a url").is_err());
        assert!(ExporterEndpoint::parse("localhost:4317").is_err());
    }

    #[test]
    fn with_port_keeps_scheme_host_and_protocol() {
        let endpoint = ExporterEndpoint::parse("https://otel.internal:4317")
            .unwrap()
            .with_protocol(OtlpProtocol::HttpProtobuf);
        let fallback = endpoint.with_port(4318);
        assert_eq!(fallback.to_string(), "https://otel.internal:4318");
        assert_eq!(fallback.protocol(), OtlpProtocol::HttpProtobuf);
    }

    #[test]
    fn traces_uri_appends_path_once() {
        let plain = ExporterEndpoint::parse("http://localhost:4318").unwrap();
        assert_eq!(
            plain.traces_uri().unwrap().to_string(),
            "http://localhost:4318/v1/traces"
        );

        let explicit = ExporterEndpoint::parse("http://localhost:4318/v1/traces/").unwrap();
        assert_eq!(
            explicit.traces_uri().unwrap().to_string(),
            "http://localhost:4318/v1/traces"
        );
    }

    #[tokio::test]
    async fn otlp_exporter_reports_transport_errors() {
        let endpoint = ExporterEndpoint::parse("http://127.0.0.1:9").unwrap();
        let exporter = OtlpHttpExporter::new(
            &endpoint,
            Arc::new(Resource::default()),
            Duration::from_millis(500),
        )
        .unwrap();

        let span = crate::span::ActiveSpan::start("op", None).finish(crate::span::SpanStatus::Ok);
        let err = exporter.export(vec![span]).await.unwrap_err();
        assert!(matches!(err, ExportError::Transport(_)));
    }

    #[tokio::test]
    async fn grpc_exporter_reports_closed_ports() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = ExporterEndpoint::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let err = OtlpGrpcExporter::connect(
            &endpoint,
            Arc::new(Resource::default()),
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ExportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn empty_batches_are_skipped() {
        let endpoint = ExporterEndpoint::parse("http://127.0.0.1:9").unwrap();
        let exporter =
            OtlpHttpExporter::new(&endpoint, Arc::new(Resource::default()), Duration::from_millis(100))
                .unwrap();
        assert!(exporter.export(Vec::new()).await.is_ok());
    }
}
