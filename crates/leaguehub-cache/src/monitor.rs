//! Hit/miss/error accounting for a cache instance.
//!
//! Counters live on the monitor (one per `TieredCache`) so tests and
//! multiple caches in one process stay isolated. Every event is mirrored
//! into the `metrics` facade for Prometheus export.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_FETCH_RETRIES_TOTAL: &str = "cache_fetch_retries_total";
    pub const CACHE_BATCH_KEYS_TOTAL: &str = "cache_batch_keys_total";
}

/// Which tier served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Remote,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Remote => "redis",
            Tier::Local => "memory",
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_operations: u64,
    /// Percentage with two decimals; 0 when nothing was recorded yet.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
pub struct CacheMonitor {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    total_operations: AtomicU64,
}

impl CacheMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: Tier) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_HITS_TOTAL, "tier" => tier.as_str()).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_ERRORS_TOTAL).increment(1);
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_operations = self.total_operations.load(Ordering::Relaxed);

        CacheMetricsSnapshot {
            hits,
            misses,
            errors,
            total_operations,
            hit_rate: hit_rate(hits, total_operations),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_operations.store(0, Ordering::Relaxed);
    }
}

fn hit_rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = hits as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_monitor_has_zero_hit_rate() {
        let monitor = CacheMonitor::new();
        let m = monitor.metrics();
        assert_eq!(m.total_operations, 0);
        assert_eq!(m.hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_is_rounded_to_two_decimals() {
        let monitor = CacheMonitor::new();
        monitor.record_hit(Tier::Local);
        monitor.record_miss();
        monitor.record_miss();

        let m = monitor.metrics();
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 2);
        assert_eq!(m.total_operations, 3);
        assert_eq!(m.hit_rate, 33.33);
    }

    #[test]
    fn errors_count_towards_total_operations() {
        let monitor = CacheMonitor::new();
        monitor.record_hit(Tier::Remote);
        monitor.record_error();

        let m = monitor.metrics();
        assert_eq!(m.errors, 1);
        assert_eq!(m.total_operations, 2);
        assert_eq!(m.hit_rate, 50.0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let monitor = CacheMonitor::new();
        monitor.record_hit(Tier::Local);
        monitor.record_error();
        monitor.reset();
        assert_eq!(monitor.metrics(), CacheMetricsSnapshot::default());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let monitor = CacheMonitor::new();
        monitor.record_hit(Tier::Local);
        let json = serde_json::to_value(monitor.metrics()).unwrap();
        assert_eq!(json["totalOperations"], 1);
        assert_eq!(json["hitRate"], 100.0);
    }
}
