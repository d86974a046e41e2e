//! # Tracer Collaborator
//!
//! The caching and request layers only *emit* span data: operation names, tags,
//! key/value logs and propagation headers. They talk to an injected [`Tracer`],
//! so the host application decides where spans go.
//!
//! - [`NoopTracer`]: discards everything (the default)
//! - [`LogTracer`]: reports finished spans as structured `tracing` events
//! - [`RecordingTracer`]: keeps finished spans in memory for inspection

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Header carrying the trace id on outbound requests
pub const TRACE_ID_HEADER: &str = "x-b3-traceid";
/// Header carrying the span id on outbound requests
pub const SPAN_ID_HEADER: &str = "x-b3-spanid";

/// Value attached to a span tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::Int(i64::from(v))
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

/// An open span. Dropping it finishes the span.
pub trait Span: Send {
    fn operation_name(&self) -> &str;

    fn set_operation_name(&mut self, name: &str);

    fn set_tag(&mut self, key: &str, value: TagValue);

    fn log_kv(&mut self, key: &str, value: &str);

    /// Write propagation headers for this span into an outbound request
    fn inject(&self, headers: &mut HeaderMap);
}

/// Factory for spans
pub trait Tracer: Send + Sync + fmt::Debug {
    fn start_span(&self, operation_name: &str) -> Box<dyn Span>;
}

/// Tracer that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan {
    operation_name: String,
}

impl Span for NoopSpan {
    fn operation_name(&self) -> &str {
        &self.operation_name
    }

    fn set_operation_name(&mut self, name: &str) {
        self.operation_name = name.to_string();
    }

    fn set_tag(&mut self, _key: &str, _value: TagValue) {}

    fn log_kv(&mut self, _key: &str, _value: &str) {}

    fn inject(&self, _headers: &mut HeaderMap) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, operation_name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan {
            operation_name: operation_name.to_string(),
        })
    }
}

/// A span after it finished, as kept by [`RecordingTracer`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinishedSpan {
    pub trace_id: String,
    pub span_id: String,
    pub operation_name: String,
    pub tags: Vec<(String, TagValue)>,
    pub logs: Vec<(String, String)>,
}

impl FinishedSpan {
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn log(&self, key: &str) -> Option<&str> {
        self.logs
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Random 128-bit trace id, 32 hex digits
fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Random 64-bit span id, 16 hex digits
fn new_span_id() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..8])
}

fn inject_ids(headers: &mut HeaderMap, trace_id: &str, span_id: &str) {
    for (name, value) in [(TRACE_ID_HEADER, trace_id), (SPAN_ID_HEADER, span_id)] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

/// Span that hands its data to a sink when dropped
struct CollectingSpan {
    data: FinishedSpan,
    sink: Arc<dyn Fn(FinishedSpan) + Send + Sync>,
}

impl Span for CollectingSpan {
    fn operation_name(&self) -> &str {
        &self.data.operation_name
    }

    fn set_operation_name(&mut self, name: &str) {
        self.data.operation_name = name.to_string();
    }

    fn set_tag(&mut self, key: &str, value: TagValue) {
        self.data.tags.push((key.to_string(), value));
    }

    fn log_kv(&mut self, key: &str, value: &str) {
        self.data.logs.push((key.to_string(), value.to_string()));
    }

    fn inject(&self, headers: &mut HeaderMap) {
        inject_ids(headers, &self.data.trace_id, &self.data.span_id);
    }
}

impl Drop for CollectingSpan {
    fn drop(&mut self) {
        (self.sink)(std::mem::take(&mut self.data));
    }
}

/// Tracer that writes every finished span as a `tracing` event
#[derive(Debug, Default)]
pub struct LogTracer {
    service_name: String,
}

impl LogTracer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, operation_name: &str) -> Box<dyn Span> {
        let service = self.service_name.clone();
        Box::new(CollectingSpan {
            data: FinishedSpan {
                trace_id: new_trace_id(),
                span_id: new_span_id(),
                operation_name: operation_name.to_string(),
                ..FinishedSpan::default()
            },
            sink: Arc::new(move |span: FinishedSpan| {
                let tags = span
                    .tags
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                info!(
                    service = %service,
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    operation = %span.operation_name,
                    tags = %tags,
                    "Span finished"
                );
            }),
        })
    }
}

/// Tracer that keeps finished spans in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    spans: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all spans finished so far, in finishing order
    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().clone()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Tracer for RecordingTracer {
    fn start_span(&self, operation_name: &str) -> Box<dyn Span> {
        let spans = Arc::clone(&self.spans);
        Box::new(CollectingSpan {
            data: FinishedSpan {
                trace_id: new_trace_id(),
                span_id: new_span_id(),
                operation_name: operation_name.to_string(),
                ..FinishedSpan::default()
            },
            sink: Arc::new(move |span: FinishedSpan| spans.lock().push(span)),
        })
    }
}
