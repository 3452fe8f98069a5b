//! Prometheus metrics for core operations.
//!
//! Atomic counters, gauges, and latency histograms with a text-format
//! serializer. Error counters are keyed by error code and emitted with an
//! `error_code` label; connection gauges track collaborator availability.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::ErrorCode;

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn serialize(&self, name: &str, labels: &str) -> String {
        if labels.is_empty() {
            format!("{name} {}\n", self.get())
        } else {
            format!("{name}{{{labels}}} {}\n", self.get())
        }
    }
}

/// Gauge that can move in both directions. Connection gauges only ever
/// hold 0 or 1.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.set(u64::from(connected));
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn serialize(&self, name: &str, labels: &str) -> String {
        if labels.is_empty() {
            format!("{name} {}\n", self.get())
        } else {
            format!("{name}{{{labels}}} {}\n", self.get())
        }
    }
}

/// Cumulative histogram with fixed upper bounds plus +Inf.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

/// Default latency buckets in seconds.
pub const DEFAULT_LATENCY_BUCKETS: [f64; 12] =
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
        }
    }

    pub fn latency() -> Self {
        Self::new(&DEFAULT_LATENCY_BUCKETS)
    }

    pub fn observe(&self, seconds: f64) {
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add((seconds * 1e9) as u64, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.sum_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }

    fn serialize(&self, name: &str, labels: &str) -> String {
        let mut out = String::new();
        let sep = if labels.is_empty() { "" } else { "," };
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            out.push_str(&format!(
                "{name}_bucket{{{labels}{sep}le=\"{bound}\"}} {}\n",
                bucket.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!("{name}_bucket{{{labels}{sep}le=\"+Inf\"}} {}\n", self.count()));
        if labels.is_empty() {
            out.push_str(&format!("{name}_sum {}\n", self.sum_seconds()));
            out.push_str(&format!("{name}_count {}\n", self.count()));
        } else {
            out.push_str(&format!("{name}_sum{{{labels}}} {}\n", self.sum_seconds()));
            out.push_str(&format!("{name}_count{{{labels}}} {}\n", self.count()));
        }
        out
    }
}

/// RAII timer: observes the elapsed time into a histogram when dropped.
pub struct LatencyTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl<'a> LatencyTimer<'a> {
    pub fn new(histogram: &'a Histogram) -> Self {
        Self { histogram, start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe_duration(self.start.elapsed());
    }
}

/// All metrics exposed by the core, serialized in Prometheus text format.
pub struct MetricsExporter {
    pub encrypt_total: Counter,
    pub decrypt_total: Counter,
    pub sign_total: Counter,
    pub verify_total: Counter,
    pub key_generate_total: Counter,
    pub key_rotate_total: Counter,
    pub key_deprecate_total: Counter,
    pub key_delete_total: Counter,

    pub encrypt_latency: Histogram,
    pub decrypt_latency: Histogram,
    pub sign_latency: Histogram,
    pub verify_latency: Histogram,
    pub key_operation_latency: Histogram,

    errors: Mutex<HashMap<ErrorCode, Counter>>,

    pub hsm_connected: Gauge,
    pub kms_connected: Gauge,
    pub logging_service_connected: Gauge,
    pub cache_service_connected: Gauge,
}

impl MetricsExporter {
    pub fn new() -> Self {
        Self {
            encrypt_total: Counter::new(),
            decrypt_total: Counter::new(),
            sign_total: Counter::new(),
            verify_total: Counter::new(),
            key_generate_total: Counter::new(),
            key_rotate_total: Counter::new(),
            key_deprecate_total: Counter::new(),
            key_delete_total: Counter::new(),
            encrypt_latency: Histogram::latency(),
            decrypt_latency: Histogram::latency(),
            sign_latency: Histogram::latency(),
            verify_latency: Histogram::latency(),
            key_operation_latency: Histogram::latency(),
            errors: Mutex::new(HashMap::new()),
            hsm_connected: Gauge::new(),
            kms_connected: Gauge::new(),
            logging_service_connected: Gauge::new(),
            cache_service_connected: Gauge::new(),
        }
    }

    /// Count one failure under its error code. Called exactly once at the
    /// place an error originates.
    pub fn record_error(&self, code: ErrorCode) {
        self.errors.lock().entry(code).or_default().inc();
    }

    pub fn error_count(&self, code: ErrorCode) -> u64 {
        self.errors.lock().get(&code).map(Counter::get).unwrap_or(0)
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP crypto_encrypt_operations_total Total encrypt operations\n");
        out.push_str("# TYPE crypto_encrypt_operations_total counter\n");
        out.push_str(&self.encrypt_total.serialize("crypto_encrypt_operations_total", ""));

        out.push_str("# HELP crypto_decrypt_operations_total Total decrypt operations\n");
        out.push_str("# TYPE crypto_decrypt_operations_total counter\n");
        out.push_str(&self.decrypt_total.serialize("crypto_decrypt_operations_total", ""));

        out.push_str("# HELP crypto_sign_operations_total Total sign operations\n");
        out.push_str("# TYPE crypto_sign_operations_total counter\n");
        out.push_str(&self.sign_total.serialize("crypto_sign_operations_total", ""));

        out.push_str("# HELP crypto_verify_operations_total Total verify operations\n");
        out.push_str("# TYPE crypto_verify_operations_total counter\n");
        out.push_str(&self.verify_total.serialize("crypto_verify_operations_total", ""));

        out.push_str("# HELP crypto_key_operations_total Total key operations\n");
        out.push_str("# TYPE crypto_key_operations_total counter\n");
        out.push_str(&self.key_generate_total.serialize(
            "crypto_key_operations_total",
            "operation=\"generate\"",
        ));
        out.push_str(
            &self.key_rotate_total.serialize("crypto_key_operations_total", "operation=\"rotate\""),
        );
        out.push_str(&self.key_deprecate_total.serialize(
            "crypto_key_operations_total",
            "operation=\"deprecate\"",
        ));
        out.push_str(
            &self.key_delete_total.serialize("crypto_key_operations_total", "operation=\"delete\""),
        );

        out.push_str("# HELP crypto_operation_latency_seconds Operation latency\n");
        out.push_str("# TYPE crypto_operation_latency_seconds histogram\n");
        out.push_str(
            &self.encrypt_latency.serialize("crypto_operation_latency_seconds", "operation=\"encrypt\""),
        );
        out.push_str(
            &self.decrypt_latency.serialize("crypto_operation_latency_seconds", "operation=\"decrypt\""),
        );
        out.push_str(
            &self.sign_latency.serialize("crypto_operation_latency_seconds", "operation=\"sign\""),
        );
        out.push_str(
            &self.verify_latency.serialize("crypto_operation_latency_seconds", "operation=\"verify\""),
        );
        out.push_str(
            &self.key_operation_latency.serialize("crypto_operation_latency_seconds", "operation=\"key\""),
        );

        let errors = self.errors.lock();
        if !errors.is_empty() {
            out.push_str("# HELP crypto_errors_total Total errors by error_code\n");
            out.push_str("# TYPE crypto_errors_total counter\n");
            let mut codes: Vec<_> = errors.iter().collect();
            codes.sort_by_key(|(code, _)| code.as_str());
            for (code, counter) in codes {
                let label = format!("error_code=\"{}\"", code.as_str());
                out.push_str(&counter.serialize("crypto_errors_total", &label));
            }
        }
        drop(errors);

        out.push_str("# HELP crypto_hsm_connected HSM connection status\n");
        out.push_str("# TYPE crypto_hsm_connected gauge\n");
        out.push_str(&self.hsm_connected.serialize("crypto_hsm_connected", ""));

        out.push_str("# HELP crypto_kms_connected KMS connection status\n");
        out.push_str("# TYPE crypto_kms_connected gauge\n");
        out.push_str(&self.kms_connected.serialize("crypto_kms_connected", ""));

        out.push_str("# HELP crypto_logging_service_connected Logging service connection status\n");
        out.push_str("# TYPE crypto_logging_service_connected gauge\n");
        out.push_str(
            &self.logging_service_connected.serialize("crypto_logging_service_connected", ""),
        );

        out.push_str("# HELP crypto_cache_service_connected Cache service connection status\n");
        out.push_str("# TYPE crypto_cache_service_connected gauge\n");
        out.push_str(&self.cache_service_connected.serialize("crypto_cache_service_connected", ""));

        out
    }
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<MetricsExporter> = OnceLock::new();

/// Process-wide metrics exporter.
pub fn metrics() -> &'static MetricsExporter {
    METRICS.get_or_init(MetricsExporter::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge_connection_values() {
        let gauge = Gauge::new();
        gauge.set_connected(true);
        assert_eq!(gauge.get(), 1);
        gauge.set_connected(false);
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let hist = Histogram::latency();
        hist.observe(0.003);
        hist.observe(0.3);

        let text = hist.serialize("crypto_operation_latency_seconds", "operation=\"encrypt\"");
        // 0.003 lands in every bucket from 0.005 up; 0.3 from 0.5 up.
        assert!(text.contains("le=\"0.005\"} 1"));
        assert!(text.contains("le=\"0.5\"} 2"));
        assert!(text.contains("le=\"+Inf\"} 2"));
        assert_eq!(hist.count(), 2);
    }

    #[test]
    fn test_error_counter_per_code() {
        let exporter = MetricsExporter::new();
        exporter.record_error(ErrorCode::IntegrityError);
        exporter.record_error(ErrorCode::IntegrityError);
        exporter.record_error(ErrorCode::KeyNotFound);

        assert_eq!(exporter.error_count(ErrorCode::IntegrityError), 2);
        assert_eq!(exporter.error_count(ErrorCode::KeyNotFound), 1);
        assert_eq!(exporter.error_count(ErrorCode::Timeout), 0);

        let text = exporter.serialize();
        assert!(text.contains("crypto_errors_total{error_code=\"INTEGRITY_ERROR\"} 2"));
        assert!(text.contains("crypto_errors_total{error_code=\"KEY_NOT_FOUND\"} 1"));
    }

    #[test]
    fn test_serialize_contains_required_metrics() {
        let exporter = MetricsExporter::new();
        exporter.encrypt_total.inc();
        exporter.key_rotate_total.inc();
        exporter.cache_service_connected.set_connected(true);

        let text = exporter.serialize();
        assert!(text.contains("crypto_encrypt_operations_total 1"));
        assert!(text.contains("crypto_key_operations_total{operation=\"rotate\"} 1"));
        assert!(text.contains("crypto_decrypt_operations_total 0"));
        assert!(text.contains("crypto_hsm_connected 0"));
        assert!(text.contains("crypto_cache_service_connected 1"));
        assert!(text.contains("# TYPE crypto_operation_latency_seconds histogram"));
    }

    #[test]
    fn test_latency_timer_observes_on_drop() {
        let hist = Histogram::latency();
        {
            let _timer = LatencyTimer::new(&hist);
        }
        assert_eq!(hist.count(), 1);
    }
}
