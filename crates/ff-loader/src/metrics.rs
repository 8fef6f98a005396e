// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loader metrics: monotonic totals plus a bounded ring of load times for
//! percentile estimates. O(1) updates; percentiles copy-and-sort on read.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Load-time samples retained.
pub const RING_CAPACITY: usize = 1_000;

/// Fixed-size circular buffer of load times (milliseconds).
pub struct LoadTimeRing {
    slots: Vec<u64>,
    next: usize,
    len: usize,
}

impl LoadTimeRing {
    /// Empty ring with [`RING_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![0; RING_CAPACITY],
            next: 0,
            len: 0,
        }
    }

    /// Record one sample, overwriting the oldest once full.
    pub fn record(&mut self, millis: u64) {
        self.slots[self.next] = millis;
        self.next = (self.next + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    /// Samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mean of the held samples.
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let sum: u64 = self.slots[..self.len.min(self.slots.len())]
            .iter()
            .copied()
            .sum();
        sum as f64 / self.len as f64
    }

    /// Nearest-rank percentile (`p` in 0–100) of the held samples.
    #[must_use]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.len == 0 {
            return 0;
        }
        let mut sorted: Vec<u64> = self.slots[..self.len].to_vec();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * self.len as f64).ceil() as usize;
        sorted[rank.clamp(1, self.len) - 1]
    }
}

impl Default for LoadTimeRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable metrics view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Leader load executions (cache misses that ran the pipeline).
    pub loads: u64,
    /// Successful leader loads.
    pub successes: u64,
    /// Failed leader loads (after retries).
    pub failures: u64,
    /// Individual retry attempts.
    pub retries: u64,
    /// Rollback operations.
    pub rollbacks: u64,
    /// Stub-cache hits.
    pub cache_hits: u64,
    /// Stub-cache misses.
    pub cache_misses: u64,
    /// Load-time samples held.
    pub samples: usize,
    /// Mean load time, milliseconds.
    pub avg_load_ms: f64,
    /// 95th-percentile load time, milliseconds.
    pub p95_load_ms: u64,
    /// 99th-percentile load time, milliseconds.
    pub p99_load_ms: u64,
}

/// Atomic counters plus the load-time ring.
pub struct LoaderMetrics {
    pub(crate) loads: AtomicU64,
    pub(crate) successes: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    ring: Mutex<LoadTimeRing>,
}

impl LoaderMetrics {
    /// Zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loads: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            ring: Mutex::new(LoadTimeRing::new()),
        }
    }

    /// Record a successful load's wall time.
    pub fn record_load_time(&self, millis: u64) {
        self.ring.lock().expect("metrics ring poisoned").record(millis);
    }

    /// Snapshot every counter and the ring statistics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ring = self.ring.lock().expect("metrics ring poisoned");
        MetricsSnapshot {
            loads: self.loads.load(Relaxed),
            successes: self.successes.load(Relaxed),
            failures: self.failures.load(Relaxed),
            retries: self.retries.load(Relaxed),
            rollbacks: self.rollbacks.load(Relaxed),
            cache_hits: self.cache_hits.load(Relaxed),
            cache_misses: self.cache_misses.load(Relaxed),
            samples: ring.len(),
            avg_load_ms: ring.average(),
            p95_load_ms: ring.percentile(95.0),
            p99_load_ms: ring.percentile(99.0),
        }
    }
}

impl Default for LoaderMetrics {
    fn default() -> Self {
        Self::new()
    }
}
