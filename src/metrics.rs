//! Thread-safe engine metrics.
//!
//! Counters for process lifecycle and cache outcomes, per-method protocol
//! call counts, and per-operation timing stats. Everything is best-effort:
//! recording never blocks meaningfully and never panics. A `snapshot()`
//! produces one serializable structure for external logging.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Timing stats for one named operation.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TimingStats {
    pub count: u64,
    pub success_count: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl TimingStats {
    fn record(&mut self, elapsed: Duration, success: bool) {
        let ms = elapsed.as_millis() as u64;
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        if success {
            self.success_count += 1;
        }
        self.total_ms += ms;
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }
}

/// One point-in-time view of all metrics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub processes_started: u64,
    pub processes_killed: u64,
    pub processes_crashed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_stale: u64,
    pub method_calls: BTreeMap<String, u64>,
    pub timings: BTreeMap<String, TimingStats>,
}

/// Shared collector. Clone-free: share via `Arc`.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    processes_started: AtomicU64,
    processes_killed: AtomicU64,
    processes_crashed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_stale: AtomicU64,
    method_calls: Mutex<BTreeMap<String, u64>>,
    timings: Mutex<BTreeMap<String, TimingStats>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_process_started(&self) {
        self.processes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_killed(&self) {
        self.processes_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_crashed(&self) {
        self.processes_crashed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_stale(&self) {
        self.cache_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one protocol call of `method`.
    pub fn record_method_call(&self, method: &str) {
        if let Ok(mut calls) = self.method_calls.lock() {
            *calls.entry(method.to_string()).or_insert(0) += 1;
        }
    }

    /// Record one timed operation.
    pub fn record_timing(&self, operation: &str, elapsed: Duration, success: bool) {
        if let Ok(mut timings) = self.timings.lock() {
            timings
                .entry(operation.to_string())
                .or_default()
                .record(elapsed, success);
        }
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn cache_stale_count(&self) -> u64 {
        self.cache_stale.load(Ordering::Relaxed)
    }

    /// Total protocol calls across all methods.
    pub fn protocol_call_count(&self) -> u64 {
        self.method_calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processes_started: self.processes_started.load(Ordering::Relaxed),
            processes_killed: self.processes_killed.load(Ordering::Relaxed),
            processes_crashed: self.processes_crashed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_stale: self.cache_stale.load(Ordering::Relaxed),
            method_calls: self
                .method_calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default(),
            timings: self
                .timings
                .lock()
                .map(|timings| timings.clone())
                .unwrap_or_default(),
        }
    }
}
