//! Serving counters and scoring latency

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Request counters updated by the serving loop
#[derive(Debug, Default)]
pub struct TelemetryCollector {
    total_requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

/// Snapshot of the collector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServingStats {
    pub total_requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ns: u64,
    pub min_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that produced ranked results
    pub fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);

        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.update_min_latency(latency_ns);
        self.update_max_latency(latency_ns);
    }

    /// Record a request answered with an error response
    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ServingStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ns.load(Ordering::Relaxed);

        let error_rate = if total_requests > 0 {
            errors as f64 / total_requests as f64
        } else {
            0.0
        };

        // Latency covers scored requests only
        let avg_latency_ns = if successes > 0 {
            total_latency / successes
        } else {
            0
        };

        ServingStats {
            total_requests,
            successes,
            errors,
            error_rate,
            avg_latency_ns,
            min_latency_ns: self.min_latency_ns.load(Ordering::Relaxed),
            max_latency_ns: self.max_latency_ns.load(Ordering::Relaxed),
        }
    }

    /// One-line summary for the shutdown log
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Requests: {} ({} ok, {} errors, {:.1}% error rate), Latency: avg {:.1}μs, min {:.1}μs, max {:.1}μs",
            stats.total_requests,
            stats.successes,
            stats.errors,
            stats.error_rate * 100.0,
            stats.avg_latency_ns as f64 / 1000.0,
            stats.min_latency_ns as f64 / 1000.0,
            stats.max_latency_ns as f64 / 1000.0
        )
    }

    fn update_min_latency(&self, latency_ns: u64) {
        let mut current = self.min_latency_ns.load(Ordering::Relaxed);
        while current == 0 || latency_ns < current {
            match self.min_latency_ns.compare_exchange_weak(
                current,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_max_latency(&self, latency_ns: u64) {
        let mut current = self.max_latency_ns.load(Ordering::Relaxed);
        while latency_ns > current {
            match self.max_latency_ns.compare_exchange_weak(
                current,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}
