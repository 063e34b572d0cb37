//! Metrics collection for the exchange engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Engine metrics.
#[derive(Default)]
pub struct Metrics {
    /// Exchange requests received.
    pub exchanges_total: AtomicU64,
    /// Exchanges recorded.
    pub exchanges_completed: AtomicU64,
    /// Exchanges refused for a business reason.
    pub exchanges_rejected: AtomicU64,
    /// Exchanges aborted by an infrastructure failure.
    pub exchanges_failed: AtomicU64,
    /// Exchanges in progress.
    pub exchanges_active: AtomicU64,
    /// Wallet lock waits that timed out.
    pub lock_timeouts: AtomicU64,
    /// Deposits recorded.
    pub deposits_total: AtomicU64,
    /// Successful rate syncs.
    pub rate_syncs_ok: AtomicU64,
    /// Failed rate syncs.
    pub rate_syncs_failed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new exchange. It stays in the active gauge until the returned
    /// guard drops, including when the request future is cancelled.
    pub fn exchange_started(&self) -> ActiveExchange<'_> {
        self.exchanges_total.fetch_add(1, Ordering::Relaxed);
        self.exchanges_active.fetch_add(1, Ordering::Relaxed);
        ActiveExchange { metrics: self }
    }

    pub fn exchange_completed(&self) {
        self.exchanges_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exchange_rejected(&self) {
        self.exchanges_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exchange_failed(&self) {
        self.exchanges_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deposit_recorded(&self) {
        self.deposits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_sync(&self, ok: bool) {
        if ok {
            self.rate_syncs_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rate_syncs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exchanges_total: self.exchanges_total.load(Ordering::Relaxed),
            exchanges_completed: self.exchanges_completed.load(Ordering::Relaxed),
            exchanges_rejected: self.exchanges_rejected.load(Ordering::Relaxed),
            exchanges_failed: self.exchanges_failed.load(Ordering::Relaxed),
            exchanges_active: self.exchanges_active.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            deposits_total: self.deposits_total.load(Ordering::Relaxed),
            rate_syncs_ok: self.rate_syncs_ok.load(Ordering::Relaxed),
            rate_syncs_failed: self.rate_syncs_failed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 9] = [
            ("exchanges_total", "counter", "Total exchange requests", s.exchanges_total),
            ("exchanges_completed", "counter", "Total recorded exchanges", s.exchanges_completed),
            ("exchanges_rejected", "counter", "Total rejected exchanges", s.exchanges_rejected),
            ("exchanges_failed", "counter", "Total failed exchanges", s.exchanges_failed),
            ("exchanges_active", "gauge", "Exchanges in progress", s.exchanges_active),
            ("lock_timeouts", "counter", "Total wallet lock timeouts", s.lock_timeouts),
            ("deposits_total", "counter", "Total recorded deposits", s.deposits_total),
            ("rate_syncs_ok", "counter", "Total successful rate syncs", s.rate_syncs_ok),
            ("rate_syncs_failed", "counter", "Total failed rate syncs", s.rate_syncs_failed),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP kantor_{name} {help}\n# TYPE kantor_{name} {kind}\nkantor_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub exchanges_total: u64,
    pub exchanges_completed: u64,
    pub exchanges_rejected: u64,
    pub exchanges_failed: u64,
    pub exchanges_active: u64,
    pub lock_timeouts: u64,
    pub deposits_total: u64,
    pub rate_syncs_ok: u64,
    pub rate_syncs_failed: u64,
}

/// Keeps one exchange in the active gauge while alive.
#[must_use = "the exchange leaves the active gauge when this guard drops"]
pub struct ActiveExchange<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.metrics.exchanges_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
