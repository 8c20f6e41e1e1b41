//! Prometheus metrics for a cache instance
//!
//! Each [`CacheMetrics`] owns its registry, so several caches in one process
//! never collide on metric names.

use anyhow::Result;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;

use crate::memory::PressureLevel;

#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    hits: IntCounter,
    misses: IntCounter,
    evictions: IntCounter,
    expirations: IntCounter,
    keys: IntGauge,
    memory_bytes: IntGauge,
    memory_pressure: IntGauge,
}

/// Point-in-time copy of the metric values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub keys: i64,
    pub memory_bytes: i64,
    /// 0 normal, 1 warning, 2 critical, 3 emergency
    pub memory_pressure: i64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let hits = register_int_counter_with_registry!(
            Opts::new("tidecache_hits_total", "Total number of read hits"),
            registry
        )?;
        let misses = register_int_counter_with_registry!(
            Opts::new("tidecache_misses_total", "Total number of read misses"),
            registry
        )?;
        let evictions = register_int_counter_with_registry!(
            Opts::new("tidecache_evictions_total", "Total number of evicted keys"),
            registry
        )?;
        let expirations = register_int_counter_with_registry!(
            Opts::new(
                "tidecache_expirations_total",
                "Total number of keys removed by the expiry wheel"
            ),
            registry
        )?;

        let keys = register_int_gauge_with_registry!(
            Opts::new("tidecache_keys", "Number of stored keys"),
            registry
        )?;
        let memory_bytes = register_int_gauge_with_registry!(
            Opts::new("tidecache_memory_bytes", "Estimated memory usage in bytes"),
            registry
        )?;
        let memory_pressure = register_int_gauge_with_registry!(
            Opts::new(
                "tidecache_memory_pressure",
                "Memory pressure level (0 normal .. 3 emergency)"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            expirations,
            keys,
            memory_bytes,
            memory_pressure,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_hit(&self) {
        self.hits.inc();
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    /// Raise the eviction counter to a cumulative total kept elsewhere
    pub fn sync_evictions(&self, total: u64) {
        sync_counter(&self.evictions, total);
    }

    pub fn sync_expirations(&self, total: u64) {
        sync_counter(&self.expirations, total);
    }

    pub fn set_keys(&self, keys: usize) {
        self.keys.set(keys as i64);
    }

    pub fn set_memory(&self, bytes: i64, pressure: PressureLevel) {
        self.memory_bytes.set(bytes);
        self.memory_pressure.set(pressure as i64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let lookups = hits + misses;
        MetricsSnapshot {
            hits,
            misses,
            evictions: self.evictions.get(),
            expirations: self.expirations.get(),
            keys: self.keys.get(),
            memory_bytes: self.memory_bytes.get(),
            memory_pressure: self.memory_pressure.get(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn sync_counter(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new().unwrap();
        assert_eq!(metrics.snapshot().hit_rate, 0.0);

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hit_rate, 0.75);
    }

    #[test]
    fn test_sync_is_monotonic() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.sync_evictions(10);
        metrics.sync_evictions(4);
        metrics.sync_evictions(12);
        assert_eq!(metrics.snapshot().evictions, 12);
    }

    #[test]
    fn test_render_contains_metrics() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.set_keys(42);
        metrics.set_memory(1024, PressureLevel::Critical);
        metrics.sync_expirations(7);

        let text = metrics.render().unwrap();
        assert!(text.contains("tidecache_keys 42"));
        assert!(text.contains("tidecache_memory_bytes 1024"));
        assert!(text.contains("tidecache_memory_pressure 2"));
        assert!(text.contains("tidecache_expirations_total 7"));
        assert!(text.contains("tidecache_hits_total 0"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = CacheMetrics::new().unwrap();
        let b = CacheMetrics::new().unwrap();
        a.record_hit();
        assert_eq!(a.snapshot().hits, 1);
        assert_eq!(b.snapshot().hits, 0);
    }
}
