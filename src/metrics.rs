use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Process-wide counters for the REST and WebSocket layers.
///
/// Counters only ever grow; the reporter in `main` logs a snapshot of
/// them periodically.
#[derive(Default)]
pub struct RuntimeMetrics {
    // REST
    pub rest_attempts: AtomicUsize,
    pub rest_retries: AtomicUsize,
    pub rest_failures: AtomicUsize,

    // WebSocket level
    pub ws_connects: AtomicUsize,
    pub ws_reconnects: AtomicUsize,
    pub frames_received: AtomicUsize,

    // Dispatch
    pub messages_dispatched: AtomicUsize,
    pub callback_errors: AtomicUsize,
    pub subscriptions_sent: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line summary used by the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "rest_attempts={} rest_retries={} rest_failures={} ws_connects={} ws_reconnects={} frames={} dispatched={} callback_err={} sub_sent={}",
            self.rest_attempts.load(Ordering::Relaxed),
            self.rest_retries.load(Ordering::Relaxed),
            self.rest_failures.load(Ordering::Relaxed),
            self.ws_connects.load(Ordering::Relaxed),
            self.ws_reconnects.load(Ordering::Relaxed),
            self.frames_received.load(Ordering::Relaxed),
            self.messages_dispatched.load(Ordering::Relaxed),
            self.callback_errors.load(Ordering::Relaxed),
            self.subscriptions_sent.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
