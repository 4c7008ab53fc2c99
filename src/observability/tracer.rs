//! Span collaborator used by the router and handoff orchestrator
//!
//! Each routing stage attempt opens a span, records what it found and ends it.
//! Spans are a side channel: nothing recorded here feeds back into a routing
//! decision. [`TracingTracer`] forwards everything to the `tracing` crate;
//! hosts with an OpenTelemetry pipeline can supply their own [`Tracer`].

use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

/// Attribute value attached to a span
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        AttributeValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

/// Final status of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// One open span
pub trait RouteSpan: Send {
    fn set_attribute(&mut self, key: &str, value: AttributeValue);
    fn set_status(&mut self, status: SpanStatus, description: Option<&str>);
    fn record_exception(&mut self, error: &(dyn std::error::Error + 'static));
    fn end(self: Box<Self>);
}

/// Span factory
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: Vec<(String, AttributeValue)>)
        -> Box<dyn RouteSpan>;
}

/// Tracer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan;

impl RouteSpan for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: AttributeValue) {}
    fn set_status(&mut self, _status: SpanStatus, _description: Option<&str>) {}
    fn record_exception(&mut self, _error: &(dyn std::error::Error + 'static)) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(
        &self,
        _name: &str,
        _attributes: Vec<(String, AttributeValue)>,
    ) -> Box<dyn RouteSpan> {
        Box::new(NoopSpan)
    }
}

/// Tracer backed by `tracing` spans and events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracer;

struct TracingSpan {
    name: String,
    span: tracing::Span,
    started: Instant,
    status: SpanStatus,
}

impl Tracer for TracingTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(String, AttributeValue)>,
    ) -> Box<dyn RouteSpan> {
        let span = tracing::debug_span!("dispatch_stage", stage = %name);
        let mut handle = TracingSpan {
            name: name.to_string(),
            span,
            started: Instant::now(),
            status: SpanStatus::Unset,
        };
        for (key, value) in attributes {
            handle.set_attribute(&key, value);
        }
        Box::new(handle)
    }
}

impl RouteSpan for TracingSpan {
    fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        self.span.in_scope(|| {
            debug!(attribute = %key, value = %value, "span attribute");
        });
    }

    fn set_status(&mut self, status: SpanStatus, description: Option<&str>) {
        self.status = status;
        if status == SpanStatus::Error {
            self.span.in_scope(|| {
                warn!(stage = %self.name, description = description.unwrap_or(""), "stage failed");
            });
        }
    }

    fn record_exception(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.span.in_scope(|| {
            warn!(stage = %self.name, error = %error, "stage raised an error");
        });
    }

    fn end(self: Box<Self>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.span.in_scope(|| {
            debug!(
                stage = %self.name,
                status = ?self.status,
                elapsed_ms,
                "stage finished"
            );
        });
    }
}
