//! Process lifecycle: graceful drain-and-shutdown.
//!
//! A process-global coordinator tracks in-flight requests, flips
//! readiness off the moment shutdown is requested, waits up to a
//! configured timeout for the in-flight count to reach zero, then runs
//! registered shutdown callbacks in reverse registration order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

type ShutdownCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CoordinatorState {
    shutdown_requested: bool,
    callbacks: Vec<ShutdownCallback>,
}

/// Coordinates drain and shutdown for the whole process.
pub struct LifecycleCoordinator {
    state: Mutex<CoordinatorState>,
    condvar: Condvar,
    in_flight: AtomicU64,
    ready: AtomicBool,
}

impl LifecycleCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            condvar: Condvar::new(),
            in_flight: AtomicU64::new(0),
            ready: AtomicBool::new(true),
        }
    }

    /// Health readiness: true until shutdown is requested.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state.lock().shutdown_requested
    }

    /// Register work to run at shutdown. Callbacks run in reverse
    /// registration order.
    pub fn register_shutdown_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        state.callbacks.push(Box::new(callback));
    }

    /// Begin tracking one request. Returns `None` once shutdown has been
    /// requested: new work is refused while draining.
    pub fn track_request(&self) -> Option<RequestGuard<'_>> {
        if self.is_shutdown_requested() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard { coordinator: self })
    }

    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Flip the shutdown flag and readiness, and wake every waiter. New
    /// requests are refused from this point on.
    pub fn request_shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shutdown_requested {
                return;
            }
            state.shutdown_requested = true;
        }
        self.ready.store(false, Ordering::SeqCst);
        self.condvar.notify_all();
        info!("shutdown requested, draining in-flight requests");
    }

    /// Wait until the in-flight count reaches zero or the timeout
    /// elapses. Returns true when fully drained.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.condvar.wait_for(&mut state, deadline - now);
        }
        true
    }

    /// Full shutdown sequence: request, drain, run callbacks in reverse
    /// order. Returns true when the drain completed before the timeout.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.request_shutdown();
        let drained = self.wait_for_drain(timeout);
        if !drained {
            warn!(
                remaining = self.in_flight_count(),
                "drain timeout elapsed with requests still in flight"
            );
        }

        let callbacks = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks.into_iter().rev() {
            callback();
        }

        info!("shutdown complete");
        drained
    }

    fn finish_request(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Take the lock so the notify cannot slip between a waiter's
            // check and its park.
            let _state = self.state.lock();
            self.condvar.notify_all();
        }
    }
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight request.
pub struct RequestGuard<'a> {
    coordinator: &'a LifecycleCoordinator,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.finish_request();
    }
}

static COORDINATOR: OnceLock<LifecycleCoordinator> = OnceLock::new();
static SIGNAL_PENDING: AtomicBool = AtomicBool::new(false);
static SIGNAL_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Process-wide coordinator.
pub fn coordinator() -> &'static LifecycleCoordinator {
    COORDINATOR.get_or_init(LifecycleCoordinator::new)
}

extern "C" fn handle_signal(_signal: libc::c_int) {
    // Only async-signal-safe work here; the watcher thread does the rest.
    SIGNAL_PENDING.store(true, Ordering::SeqCst);
}

/// Install SIGTERM/SIGINT handlers that request shutdown on the global
/// coordinator. A watcher thread turns the signal flag into the actual
/// shutdown request, keeping the handler async-signal-safe.
#[cfg(unix)]
pub fn install_signal_handlers() {
    if SIGNAL_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let handler = handle_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }

    std::thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(|| loop {
            if SIGNAL_PENDING.swap(false, Ordering::SeqCst) {
                coordinator().request_shutdown();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        })
        .expect("failed to spawn signal watcher");
}
