//! Shared substrate for the crypto service core.
//!
//! This crate provides the pieces every other layer leans on: the unified
//! result/error taxonomy, page-locked secure buffers for plaintext key
//! material, input validation limits, W3C trace-context propagation, and
//! the Prometheus metrics exporter.

pub mod error;
pub mod metrics;
pub mod secure;
pub mod trace;
pub mod validate;

pub use error::{CryptoResult, Error, ErrorCode};
pub use metrics::{metrics, LatencyTimer, MetricsExporter};
pub use secure::SecureBuffer;
pub use trace::{ConsoleSpanExporter, Span, SpanExporter, SpanKind, SpanStatus, TraceContext, Tracer};
