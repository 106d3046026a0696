use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// In-memory counter. Monotonically increasing.
#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory histogram. Stores all observations for percentile computation.
#[derive(Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let p95_idx = ((count as f64 * 0.95) as usize).min(count - 1);
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: obs[count / 2],
            p95: obs[p95_idx],
            max: obs[count - 1],
        }
    }
}

/// Summary statistics from a histogram, in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

/// Point-in-time copy of the run counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub batches: u64,
    pub retries: u64,
    pub degraded_batches: u64,
    pub written: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Counters and service-call latency for one run.
#[derive(Default)]
pub struct RunMetrics {
    batches: Counter,
    retries: Counter,
    degraded_batches: Counter,
    written: Counter,
    failed: Counter,
    skipped: Counter,
    call_latency_ms: Histogram,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self) {
        self.batches.increment(1);
    }

    pub fn record_retry(&self) {
        self.retries.increment(1);
    }

    pub fn record_degraded(&self) {
        self.degraded_batches.increment(1);
    }

    pub fn record_written(&self, n: u64) {
        self.written.increment(n);
    }

    pub fn record_failed(&self, n: u64) {
        self.failed.increment(n);
    }

    pub fn record_skipped(&self, n: u64) {
        self.skipped.increment(n);
    }

    pub fn observe_call(&self, elapsed: Duration) {
        self.call_latency_ms.observe(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn totals(&self) -> RunTotals {
        RunTotals {
            batches: self.batches.get(),
            retries: self.retries.get(),
            degraded_batches: self.degraded_batches.get(),
            written: self.written.get(),
            failed: self.failed.get(),
            skipped: self.skipped.get(),
        }
    }

    pub fn call_latency(&self) -> HistogramSummary {
        self.call_latency_ms.summary()
    }

    /// Emit the counters and latency summary as one structured event.
    pub fn log_summary(&self) {
        let t = self.totals();
        let latency = self.call_latency();
        info!(
            batches = t.batches,
            retries = t.retries,
            degraded_batches = t.degraded_batches,
            written = t.written,
            failed = t.failed,
            skipped = t.skipped,
            calls = latency.count,
            latency_p50_ms = latency.p50,
            latency_p95_ms = latency.p95,
            latency_max_ms = latency.max,
            "run metrics"
        );
    }
}
