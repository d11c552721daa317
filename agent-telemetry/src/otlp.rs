//! OTLP protobuf encoding of span batches.
//!
//! The same [`ExportTraceServiceRequest`] is sent over gRPC and as the body
//! of an OTLP/HTTP POST.

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, SpanKind};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as ProtoSpan, Status};
use prost::Message;

use crate::resource::Resource;
use crate::span::{AttributeValue, Span, SpanEvent, SpanStatus};

const SCOPE_NAME: &str = "agent-telemetry";

/// Builds a single-resource export request from a batch of spans.
#[must_use]
pub fn export_request(resource: &Resource, spans: &[Span]) -> ExportTraceServiceRequest {
    let resource_attributes = resource.attributes();
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(ProtoResource {
                attributes: key_values(resource_attributes.iter().map(|(k, v)| (*k, v))),
                ..ProtoResource::default()
            }),
            scope_spans: vec![ScopeSpans {
                scope: Some(InstrumentationScope {
                    name: SCOPE_NAME.to_owned(),
                    version: env!("CARGO_PKG_VERSION").to_owned(),
                    ..InstrumentationScope::default()
                }),
                spans: spans.iter().map(encode_span).collect(),
                ..ScopeSpans::default()
            }],
            ..ResourceSpans::default()
        }],
    }
}

/// Encodes a request as an OTLP/HTTP protobuf body.
#[must_use]
pub fn encode_body(request: &ExportTraceServiceRequest) -> Vec<u8> {
    request.encode_to_vec()
}

fn encode_span(span: &Span) -> ProtoSpan {
    let (code, message) = match span.status() {
        SpanStatus::Ok => (StatusCode::Ok, String::new()),
        SpanStatus::Error => (
            StatusCode::Error,
            span.attribute("agent.error_message")
                .map(ToString::to_string)
                .unwrap_or_default(),
        ),
    };

    ProtoSpan {
        trace_id: span.trace_id().as_u128().to_be_bytes().to_vec(),
        span_id: span.span_id().as_u64().to_be_bytes().to_vec(),
        parent_span_id: span
            .parent_span_id()
            .map(|id| id.as_u64().to_be_bytes().to_vec())
            .unwrap_or_default(),
        name: span.name().to_owned(),
        kind: SpanKind::Internal as i32,
        start_time_unix_nano: span.start_unix_nanos(),
        end_time_unix_nano: span.end_unix_nanos(),
        attributes: key_values(span.attributes().iter().map(|(k, v)| (k.as_str(), v))),
        events: span.events().iter().map(encode_event).collect(),
        status: Some(Status {
            message,
            code: code as i32,
        }),
        ..ProtoSpan::default()
    }
}

fn encode_event(event: &SpanEvent) -> Event {
    Event {
        time_unix_nano: event.time_unix_nanos(),
        name: event.name().to_owned(),
        attributes: key_values(event.attributes().iter().map(|(k, v)| (k.as_str(), v))),
        ..Event::default()
    }
}

fn key_values<'a, I, K>(pairs: I) -> Vec<KeyValue>
where
    I: IntoIterator<Item = (K, &'a AttributeValue)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| KeyValue {
            key: key.into(),
            value: Some(any_value_of(value)),
        })
        .collect()
}

fn any_value_of(value: &AttributeValue) -> AnyValue {
    let value = match value {
        AttributeValue::String(text) => any_value::Value::StringValue(text.clone()),
        AttributeValue::Int(number) => any_value::Value::IntValue(*number),
        AttributeValue::Float(number) => any_value::Value::DoubleValue(*number),
        AttributeValue::Bool(flag) => any_value::Value::BoolValue(*flag),
    };
    AnyValue { value: Some(value) }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::span::ActiveSpan;

    fn encode(spans: &[Span]) -> ExportTraceServiceRequest {
        export_request(&Resource::new("svc", "1.0.0", "test"), spans)
    }

    fn only_span(request: &ExportTraceServiceRequest) -> &ProtoSpan {
        &request.resource_spans[0].scope_spans[0].spans[0]
    }

    #[test]
    fn encodes_ids_times_and_status() {
        let root = ActiveSpan::start("self_correction_loop", None);
        let mut child = ActiveSpan::start("output_validation", Some(root.context()));
        child.set_attribute("agent.positional_arg_count", 2_usize);
        child.set_attribute("agent.error_message", "bad json");
        child.add_event("exception", [("exception.type", "ParseError")]);
        let child = child.close(SpanStatus::Error, Duration::from_millis(3));

        let request = encode(std::slice::from_ref(&child));
        let span = only_span(&request);

        assert_eq!(span.trace_id.len(), 16);
        assert_eq!(span.span_id.len(), 8);
        assert_eq!(
            span.parent_span_id,
            root.context().span_id().as_u64().to_be_bytes()
        );
        assert_eq!(span.kind, SpanKind::Internal as i32);
        let status = span.status.as_ref().unwrap();
        assert_eq!(status.code, StatusCode::Error as i32);
        assert_eq!(status.message, "bad json");
        assert_eq!(span.events[0].name, "exception");
        assert_eq!(span.end_time_unix_nano - span.start_time_unix_nano, 3_000_000);

        let count = span
            .attributes
            .iter()
            .find(|kv| kv.key == "agent.positional_arg_count")
            .and_then(|kv| kv.value.as_ref())
            .and_then(|value| value.value.as_ref());
        assert_eq!(count, Some(&any_value::Value::IntValue(2)));
    }

    #[test]
    fn attaches_resource_and_scope() {
        let request = encode(&[]);
        let resource_spans = &request.resource_spans[0];
        let attributes = &resource_spans.resource.as_ref().unwrap().attributes;
        assert_eq!(attributes[0].key, "service.name");
        assert_eq!(
            attributes[0].value.as_ref().and_then(|v| v.value.as_ref()),
            Some(&any_value::Value::StringValue("svc".into()))
        );
        assert_eq!(
            resource_spans.scope_spans[0].scope.as_ref().map(|s| s.name.as_str()),
            Some(SCOPE_NAME)
        );
    }

    #[test]
    fn root_spans_have_empty_parent() {
        let span = ActiveSpan::start("root", None).finish(SpanStatus::Ok);
        let request = encode(&[span]);
        let encoded = only_span(&request);
        assert!(encoded.parent_span_id.is_empty());
        assert_eq!(encoded.status.as_ref().unwrap().code, StatusCode::Ok as i32);
    }

    #[test]
    fn http_body_decodes_to_the_same_request() {
        let span = ActiveSpan::start("content_moderation", None).finish(SpanStatus::Ok);
        let request = encode(&[span]);

        let decoded = ExportTraceServiceRequest::decode(encode_body(&request).as_slice()).unwrap();
        assert_eq!(decoded, request);
    }
}
