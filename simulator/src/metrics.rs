//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total exchanges attempted.
    pub total_exchanges: u64,
    /// Exchanges recorded.
    pub completed_exchanges: u64,
    /// Exchanges refused for a business reason.
    pub rejected_exchanges: u64,
    /// Exchanges aborted by an infrastructure failure.
    pub failed_exchanges: u64,
    /// Rejections and failures by error code.
    pub errors_by_code: BTreeMap<&'static str, u64>,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_exchanges: 0,
            completed_exchanges: 0,
            rejected_exchanges: 0,
            failed_exchanges: 0,
            errors_by_code: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a recorded exchange.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_exchanges += 1;
        self.completed_exchanges += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a rejected or failed exchange.
    pub fn record_error(&mut self, code: &'static str, rejected: bool) {
        self.total_exchanges += 1;
        if rejected {
            self.rejected_exchanges += 1;
        } else {
            self.failed_exchanges += 1;
        }
        *self.errors_by_code.entry(code).or_default() += 1;
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_exchanges == 0 {
            return 0.0;
        }

        self.completed_exchanges as f64 / self.total_exchanges as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
