//! Batching client for the centralized logging collaborator.
//!
//! Log calls enqueue locally and return immediately; a background worker
//! drains the queue in batches to the configured sink. When the queue is
//! full entries are dropped and counted, and when the sink fails the
//! batch falls back to local `tracing` output. Logging is advisory:
//! nothing here ever propagates into an operation result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crypto_service_common::error::CryptoResult;
use crypto_service_common::metrics::metrics;

/// Log severity, matching the logging service's levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One entry bound for the logging service.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub correlation_id: Option<String>,
    pub fields: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for drained batches. Implementations may perform network
/// I/O; they run only on the worker thread.
pub trait LogSink: Send + Sync {
    fn emit(&self, batch: &[LogEntry]) -> CryptoResult<()>;
}

/// Sink that writes through local `tracing`, used as the default and as
/// the fallback when a real sink fails.
pub struct TracingLogSink;

impl TracingLogSink {
    fn emit_one(entry: &LogEntry) {
        let correlation = entry.correlation_id.as_deref().unwrap_or("-");
        match entry.level {
            LogLevel::Debug => debug!(correlation_id = correlation, "{}", entry.message),
            LogLevel::Info => info!(correlation_id = correlation, "{}", entry.message),
            LogLevel::Warn => warn!(correlation_id = correlation, "{}", entry.message),
            LogLevel::Error => error!(correlation_id = correlation, "{}", entry.message),
        }
    }
}

impl LogSink for TracingLogSink {
    fn emit(&self, batch: &[LogEntry]) -> CryptoResult<()> {
        for entry in batch {
            Self::emit_one(entry);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoggingClientConfig {
    /// Entries per dispatched batch.
    pub batch_size: usize,
    /// Maximum time an entry waits before the worker flushes anyway.
    pub flush_interval: Duration,
    /// Queue capacity; entries beyond it are dropped and counted.
    pub buffer_size: usize,
    pub service_id: String,
}

impl Default for LoggingClientConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            buffer_size: 10_000,
            service_id: "crypto-service".to_string(),
        }
    }
}

enum WorkerMessage {
    Entry(Box<LogEntry>),
    Flush,
    Shutdown,
}

/// Synchronous facade over the background logging worker.
pub struct LoggingClient {
    sender: SyncSender<WorkerMessage>,
    service_id: String,
    pending: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoggingClient {
    /// Start the client and its worker thread around the given sink.
    pub fn start(config: LoggingClientConfig, sink: Arc<dyn LogSink>) -> Self {
        let (sender, receiver) = mpsc::sync_channel(config.buffer_size.max(1));
        let service_id = config.service_id.clone();
        let pending = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let connected = Arc::new(AtomicBool::new(true));
        metrics().logging_service_connected.set_connected(true);

        let worker = {
            let pending = pending.clone();
            let connected = connected.clone();
            std::thread::Builder::new()
                .name("logging-client".to_string())
                .spawn(move || worker_loop(receiver, sink, config, pending, connected))
                .expect("failed to spawn logging worker")
        };

        Self {
            sender,
            service_id,
            pending,
            dropped,
            connected,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue one entry. Completes locally; never blocks on I/O.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        correlation_id: Option<String>,
        mut fields: HashMap<String, String>,
    ) {
        fields
            .entry("service_id".to_string())
            .or_insert_with(|| self.service_id.clone());

        let entry = LogEntry {
            level,
            message: message.into(),
            correlation_id,
            fields,
            timestamp: Utc::now(),
        };

        match self.sender.try_send(WorkerMessage::Entry(Box::new(entry))) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Ask the worker to dispatch whatever is queued.
    pub fn flush(&self) {
        let _ = self.sender.try_send(WorkerMessage::Flush);
    }

    /// Entries queued but not yet dispatched.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Entries discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Stop the worker, draining what remains. Idempotent.
    pub fn shutdown(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = self.sender.send(WorkerMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for LoggingClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    receiver: Receiver<WorkerMessage>,
    sink: Arc<dyn LogSink>,
    config: LoggingClientConfig,
    pending: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
) {
    let mut batch: Vec<LogEntry> = Vec::with_capacity(config.batch_size);

    loop {
        match receiver.recv_timeout(config.flush_interval) {
            Ok(WorkerMessage::Entry(entry)) => {
                batch.push(*entry);
                if batch.len() >= config.batch_size {
                    dispatch(&sink, &mut batch, &pending, &connected);
                }
            }
            Ok(WorkerMessage::Flush) | Err(RecvTimeoutError::Timeout) => {
                dispatch(&sink, &mut batch, &pending, &connected);
            }
            Ok(WorkerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                // Drain whatever is already queued, then exit.
                while let Ok(message) = receiver.try_recv() {
                    if let WorkerMessage::Entry(entry) = message {
                        batch.push(*entry);
                    }
                }
                dispatch(&sink, &mut batch, &pending, &connected);
                return;
            }
        }
    }
}

fn dispatch(
    sink: &Arc<dyn LogSink>,
    batch: &mut Vec<LogEntry>,
    pending: &Arc<AtomicUsize>,
    connected: &Arc<AtomicBool>,
) {
    if batch.is_empty() {
        return;
    }

    match sink.emit(batch) {
        Ok(()) => {
            if !connected.swap(true, Ordering::Relaxed) {
                metrics().logging_service_connected.set_connected(true);
            }
        }
        Err(err) => {
            if connected.swap(false, Ordering::Relaxed) {
                metrics().logging_service_connected.set_connected(false);
            }
            debug!("logging sink failed, falling back to local output: {}", err.to_log_string());
            let _ = TracingLogSink.emit(batch);
        }
    }

    pending.fetch_sub(batch.len(), Ordering::Relaxed);
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_service_common::error::{Error, ErrorCode};
    use parking_lot::Mutex as PlMutex;

    struct RecordingSink {
        batches: PlMutex<Vec<Vec<LogEntry>>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { batches: PlMutex::new(Vec::new()), failing: AtomicBool::new(false) }
        }

        fn entries(&self) -> Vec<LogEntry> {
            self.batches.lock().iter().flatten().cloned().collect()
        }
    }

    impl LogSink for RecordingSink {
        fn emit(&self, batch: &[LogEntry]) -> CryptoResult<()> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(Error::new(ErrorCode::LoggingUnavailable, "Sink offline"));
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_log_is_buffered_then_dispatched() {
        let sink = Arc::new(RecordingSink::new());
        let config = LoggingClientConfig {
            batch_size: 2,
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let client = LoggingClient::start(config, sink.clone());

        client.log(LogLevel::Info, "first", Some("corr-1".to_string()), HashMap::new());
        client.log(LogLevel::Error, "second", None, HashMap::new());

        assert!(wait_until(Duration::from_secs(2), || sink.entries().len() == 2));
        let entries = sink.entries();
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[0].correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_interval_flush_without_full_batch() {
        let sink = Arc::new(RecordingSink::new());
        let config = LoggingClientConfig {
            batch_size: 100,
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let client = LoggingClient::start(config, sink.clone());

        client.log(LogLevel::Info, "lonely", None, HashMap::new());
        assert!(wait_until(Duration::from_secs(2), || sink.entries().len() == 1));
    }

    struct BlockingSink {
        gate: Arc<PlMutex<()>>,
    }

    impl LogSink for BlockingSink {
        fn emit(&self, _batch: &[LogEntry]) -> CryptoResult<()> {
            let _gate = self.gate.lock();
            Ok(())
        }
    }

    #[test]
    fn test_full_buffer_drops_and_counts() {
        let gate = Arc::new(PlMutex::new(()));
        let sink = Arc::new(BlockingSink { gate: gate.clone() });
        let config = LoggingClientConfig {
            batch_size: 1,
            flush_interval: Duration::from_millis(10),
            buffer_size: 4,
            ..Default::default()
        };

        // Hold the sink shut so the worker wedges on its first dispatch
        // and the queue backs up.
        let held = gate.lock();
        let client = LoggingClient::start(config, sink);
        for i in 0..32 {
            client.log(LogLevel::Info, format!("msg {i}"), None, HashMap::new());
        }
        assert!(client.dropped_count() > 0);

        drop(held);
        client.shutdown();
    }

    #[test]
    fn test_sink_failure_marks_disconnected_and_recovers() {
        let sink = Arc::new(RecordingSink::new());
        let config = LoggingClientConfig {
            batch_size: 1,
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let client = LoggingClient::start(config, sink.clone());
        assert!(client.is_connected());

        sink.failing.store(true, Ordering::Relaxed);
        client.log(LogLevel::Info, "lost", None, HashMap::new());
        assert!(wait_until(Duration::from_secs(2), || !client.is_connected()));

        sink.failing.store(false, Ordering::Relaxed);
        client.log(LogLevel::Info, "recovered", None, HashMap::new());
        assert!(wait_until(Duration::from_secs(2), || client.is_connected()));
    }

    #[test]
    fn test_log_never_blocks_caller() {
        let sink = Arc::new(RecordingSink::new());
        let client = LoggingClient::start(LoggingClientConfig::default(), sink);

        let start = std::time::Instant::now();
        for _ in 0..1000 {
            client.log(LogLevel::Debug, "fast path", None, HashMap::new());
        }
        // Enqueueing a thousand entries is local work only.
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
