//! Observability: structured logging setup and the span collaborator used
//! to make routing stages observable.

pub mod logging;
pub mod tracer;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use tracer::{AttributeValue, NoopTracer, RouteSpan, SpanStatus, Tracer, TracingTracer};

// Span macros for structured logging
pub use logging::{handoff_span, route_span, stream_span};
