//! W3C trace-context propagation and span export.
//!
//! Parses `traceparent`/`tracestate` headers, derives correlation ids, and
//! produces child spans that inherit the parent trace. Export is delegated
//! to registered exporters; span creation never blocks on I/O.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;

/// Parsed W3C trace context: `00-<32 hex>-<16 hex>-<2 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
    pub tracestate: BTreeMap<String, String>,
}

const TRACEPARENT_MIN_LEN: usize = 55;
const TRACE_ID_LEN: usize = 32;
const SPAN_ID_LEN: usize = 16;

fn is_lower_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn is_all_zero(s: &str) -> bool {
    s.chars().all(|c| c == '0')
}

fn random_hex(bytes: usize) -> String {
    // Regenerate on the (astronomically unlikely) all-zero draw; zero ids
    // are invalid on the wire.
    loop {
        let mut buf = vec![0u8; bytes];
        OsRng.fill_bytes(&mut buf);
        if buf.iter().any(|&b| b != 0) {
            return buf.iter().map(|b| format!("{b:02x}")).collect();
        }
    }
}

impl TraceContext {
    /// Parse a `traceparent` header. Returns `None` for anything that is
    /// not a well-formed version-00 header with non-zero ids.
    pub fn parse(traceparent: &str) -> Option<Self> {
        if traceparent.len() < TRACEPARENT_MIN_LEN {
            return None;
        }
        if !traceparent.starts_with("00-") {
            return None;
        }

        let rest = &traceparent[3..];
        let trace_id = rest.get(..TRACE_ID_LEN)?;
        if !is_lower_hex(trace_id) || is_all_zero(trace_id) {
            return None;
        }
        if rest.as_bytes().get(TRACE_ID_LEN) != Some(&b'-') {
            return None;
        }

        let rest = &rest[TRACE_ID_LEN + 1..];
        let span_id = rest.get(..SPAN_ID_LEN)?;
        if !is_lower_hex(span_id) || is_all_zero(span_id) {
            return None;
        }
        if rest.as_bytes().get(SPAN_ID_LEN) != Some(&b'-') {
            return None;
        }

        let flags = rest.get(SPAN_ID_LEN + 1..SPAN_ID_LEN + 3)?;
        if !is_lower_hex(flags) {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            sampled: flags.ends_with('1'),
            tracestate: BTreeMap::new(),
        })
    }

    /// Merge a `tracestate` header (`key1=value1,key2=value2`) into this
    /// context. Malformed pairs are skipped.
    pub fn parse_tracestate(&mut self, header: &str) {
        for pair in header.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                if !key.is_empty() {
                    self.tracestate.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    /// Fresh root context with random trace and span ids.
    pub fn new_root() -> Self {
        Self {
            trace_id: random_hex(16),
            span_id: random_hex(8),
            parent_span_id: None,
            sampled: true,
            tracestate: BTreeMap::new(),
        }
    }

    /// Derive a child context: same trace id, new span id, this span as
    /// parent, tracestate carried over.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex(8),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
            tracestate: self.tracestate.clone(),
        }
    }

    /// Correlation id: the first 16 hex characters of the trace id.
    pub fn correlation_id(&self) -> String {
        self.trace_id.chars().take(16).collect()
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{}", self.trace_id, self.span_id, if self.sampled { "01" } else { "00" })
    }

    pub fn to_tracestate(&self) -> String {
        self.tracestate
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// A single unit of traced work.
#[derive(Debug)]
pub struct Span {
    name: String,
    kind: SpanKind,
    context: TraceContext,
    start: Instant,
    duration: Option<Duration>,
    status: SpanStatus,
    status_description: String,
    attributes: BTreeMap<String, String>,
}

impl Span {
    fn new(name: impl Into<String>, kind: SpanKind, context: TraceContext) -> Self {
        let mut attributes = BTreeMap::new();
        if !context.trace_id.is_empty() {
            attributes.insert("correlation_id".to_string(), context.correlation_id());
        }
        Self {
            name: name.into(),
            kind,
            context,
            start: Instant::now(),
            duration: None,
            status: SpanStatus::Unset,
            status_description: String::new(),
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn correlation_id(&self) -> String {
        self.context.correlation_id()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_status(&mut self, status: SpanStatus, description: impl Into<String>) {
        self.status = status;
        self.status_description = description.into();
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    /// Mark the span finished. Idempotent.
    pub fn end(&mut self) {
        if self.duration.is_none() {
            self.duration = Some(self.start.elapsed());
        }
    }

    pub fn ended(&self) -> bool {
        self.duration.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// Receives finished spans.
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: &Span);
}

/// Exporter that prints one line per span, for local debugging.
pub struct ConsoleSpanExporter;

impl SpanExporter for ConsoleSpanExporter {
    fn export(&self, span: &Span) {
        println!(
            "[TRACE] trace_id={} span_id={} correlation_id={} name={}",
            span.context().trace_id,
            span.context().span_id,
            span.correlation_id(),
            span.name()
        );
    }
}

/// Produces spans for one service and fans finished spans out to the
/// registered exporters.
pub struct Tracer {
    service_name: String,
    exporters: RwLock<Vec<Arc<dyn SpanExporter>>>,
}

impl Tracer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into(), exporters: RwLock::new(Vec::new()) }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn add_exporter(&self, exporter: Arc<dyn SpanExporter>) {
        self.exporters.write().push(exporter);
    }

    /// Start a root span with a fresh trace id.
    pub fn start_span(&self, name: impl Into<String>, kind: SpanKind) -> Span {
        let mut span = Span::new(name, kind, TraceContext::new_root());
        span.set_attribute("service.name", self.service_name.clone());
        span
    }

    /// Start a child span under the given parent context.
    pub fn start_child_span(
        &self,
        name: impl Into<String>,
        parent: &TraceContext,
        kind: SpanKind,
    ) -> Span {
        let mut span = Span::new(name, kind, parent.child());
        span.set_attribute("service.name", self.service_name.clone());
        span
    }

    /// Start a span from incoming headers, falling back to a fresh root
    /// when the `traceparent` is absent or malformed.
    pub fn start_span_from_headers(
        &self,
        name: impl Into<String>,
        traceparent: &str,
        tracestate: &str,
        kind: SpanKind,
    ) -> Span {
        match TraceContext::parse(traceparent) {
            Some(mut parent) => {
                if !tracestate.is_empty() {
                    parent.parse_tracestate(tracestate);
                }
                self.start_child_span(name, &parent, kind)
            }
            None => self.start_span(name, kind),
        }
    }

    /// End the span and hand it to every registered exporter.
    pub fn finish(&self, mut span: Span) {
        span.end();
        for exporter in self.exporters.read().iter() {
            exporter.export(&span);
        }
    }
}

static TRACERS: OnceLock<Mutex<HashMap<String, Arc<Tracer>>>> = OnceLock::new();

/// Process-wide tracer registry, one tracer per service name.
pub fn tracer(service_name: &str) -> Arc<Tracer> {
    let registry = TRACERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut tracers = registry.lock();
    tracers
        .entry(service_name.to_string())
        .or_insert_with(|| Arc::new(Tracer::new(service_name)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_parse_valid_traceparent() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.span_id, "b7ad6b7169203331");
        assert!(ctx.sampled);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TraceContext::parse("").is_none());
        assert!(TraceContext::parse("00-short-short-01").is_none());
        // Wrong version.
        assert!(TraceContext::parse("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
            .is_none());
        // Uppercase hex is invalid on the wire.
        assert!(TraceContext::parse("00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01")
            .is_none());
    }

    #[test]
    fn test_parse_rejects_zero_ids() {
        assert!(TraceContext::parse("00-00000000000000000000000000000000-b7ad6b7169203331-01")
            .is_none());
        assert!(TraceContext::parse("00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01")
            .is_none());
    }

    #[test]
    fn test_correlation_id_is_first_half_of_trace_id() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.correlation_id(), "0af7651916cd43dd");
    }

    #[test]
    fn test_child_inherits_trace_and_records_parent() {
        let parent = TraceContext::parse(SAMPLE).unwrap();
        let child = parent.child();
        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
        assert_eq!(child.parent_span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_eq!(child.span_id.len(), 16);
    }

    #[test]
    fn test_tracestate_roundtrip() {
        let mut ctx = TraceContext::parse(SAMPLE).unwrap();
        ctx.parse_tracestate("congo=t61rcWkgMzE, rojo=00f067aa0ba902b7");
        assert_eq!(ctx.tracestate.get("congo").map(String::as_str), Some("t61rcWkgMzE"));
        let rendered = ctx.to_tracestate();
        assert!(rendered.contains("congo=t61rcWkgMzE"));
        assert!(rendered.contains("rojo=00f067aa0ba902b7"));

        let child = ctx.child();
        assert_eq!(child.tracestate, ctx.tracestate);
    }

    #[test]
    fn test_traceparent_roundtrip() {
        let ctx = TraceContext::parse(SAMPLE).unwrap();
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn test_root_ids_are_random_and_nonzero() {
        let a = TraceContext::new_root();
        let b = TraceContext::new_root();
        assert_eq!(a.trace_id.len(), 32);
        assert_eq!(a.span_id.len(), 16);
        assert_ne!(a.trace_id, b.trace_id);
        assert!(!is_all_zero(&a.trace_id));
    }

    #[test]
    fn test_tracer_child_span_from_headers() {
        let tracer = Tracer::new("crypto-service");
        let span = tracer.start_span_from_headers("encrypt", SAMPLE, "", SpanKind::Server);
        assert_eq!(span.context().trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(span.context().parent_span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_eq!(span.correlation_id(), "0af7651916cd43dd");
        assert_eq!(span.attribute("service.name"), Some("crypto-service"));
    }

    #[test]
    fn test_span_end_idempotent() {
        let tracer = Tracer::new("test");
        let mut span = tracer.start_span("op", SpanKind::Internal);
        span.end();
        let first = span.duration();
        span.end();
        assert_eq!(span.duration(), first);
    }

    #[test]
    fn test_global_registry_reuses_tracers() {
        let a = tracer("svc-a");
        let b = tracer("svc-a");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_finish_exports_to_every_exporter() {
        struct Recording(Mutex<Vec<String>>);
        impl SpanExporter for Recording {
            fn export(&self, span: &Span) {
                assert!(span.ended());
                self.0.lock().push(span.name().to_string());
            }
        }

        let tracer = Tracer::new("test");
        let first = Arc::new(Recording(Mutex::new(Vec::new())));
        let second = Arc::new(Recording(Mutex::new(Vec::new())));
        tracer.add_exporter(first.clone());
        tracer.add_exporter(second.clone());

        let mut span = tracer.start_span("encrypt", SpanKind::Server);
        span.set_status(SpanStatus::Ok, "");
        tracer.finish(span);

        assert_eq!(*first.0.lock(), vec!["encrypt".to_string()]);
        assert_eq!(*second.0.lock(), vec!["encrypt".to_string()]);
    }
}
