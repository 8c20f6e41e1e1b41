//! Cache facade
//!
//! [`Cache`] ties a sharded [`Store`] to its memory tracker, the eviction
//! controller, the expiry wheel and the metrics registry. Reads and writes go
//! straight to the store; the facade keeps the wheel in step with every
//! deadline change and refuses writes under `noeviction` once memory runs out.

use anyhow::Result as AnyResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::background::Worker;
use crate::cache::data_structures::{DataType, Value};
use crate::cache::entry::{Entry, Ttl, ENTRY_OVERHEAD, TAG_OVERHEAD};
use crate::cache::eviction::{EvictionController, EvictionPolicy, EvictionRound, EvictionStats};
use crate::cache::timing_wheel::TimingWheel;
use crate::clock::{system_clock, SharedClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::kv::{SetOptions, Store};
use crate::memory::{MemoryTracker, PressureLevel};
use crate::monitoring::CacheMetrics;

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub keys: usize,
    pub memory_usage: i64,
    pub max_memory: i64,
    pub pressure: PressureLevel,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub expired: u64,
    pub tracked_deadlines: usize,
    pub eviction: EvictionStats,
}

pub struct Cache {
    config: CacheConfig,
    store: Arc<Store>,
    memory: Arc<MemoryTracker>,
    eviction: Arc<EvictionController>,
    wheel: Arc<TimingWheel>,
    metrics: CacheMetrics,
    evictor: Mutex<Option<Worker>>,
}

impl Cache {
    /// Build a cache on the system clock
    pub fn new(config: CacheConfig) -> AnyResult<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> AnyResult<Self> {
        config.validate()?;
        let memory = Arc::new(MemoryTracker::new(
            config.max_memory_bytes()?,
            config.pressure_warning,
            config.pressure_critical,
        ));
        let store = Arc::new(Store::with_clock(clock).with_memory_tracker(memory.clone()));
        let eviction = Arc::new(EvictionController::new(
            config.eviction_policy,
            store.clone(),
            memory.clone(),
            config.eviction_sample_size,
        ));
        let wheel = Arc::new(TimingWheel::new(store.clone()));
        let metrics = CacheMetrics::new()?;

        let cache = Self {
            config,
            store,
            memory,
            eviction,
            wheel,
            metrics,
            evictor: Mutex::new(None),
        };
        cache.on_evict(|_, _| {});
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    pub fn eviction(&self) -> &Arc<EvictionController> {
        &self.eviction
    }

    pub fn wheel(&self) -> &Arc<TimingWheel> {
        &self.wheel
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Register an eviction observer
    ///
    /// Evicted keys are also resynced with the expiry wheel before `callback` runs.
    pub fn on_evict<F>(&self, callback: F)
    where
        F: Fn(&str, &Entry) + Send + Sync + 'static,
    {
        let wheel = Arc::downgrade(&self.wheel);
        self.eviction.on_evict(move |key, entry| {
            if entry.has_ttl() {
                if let Some(wheel) = wheel.upgrade() {
                    wheel.sync(key);
                }
            }
            callback(key, entry);
        });
    }

    pub fn get(&self, key: &str) -> Option<Arc<Entry>> {
        let entry = self.store.get(key);
        match entry {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        entry
    }

    /// Read without counting a hit or touching the entry
    pub fn peek(&self, key: &str) -> Option<Arc<Entry>> {
        self.store.peek(key)
    }

    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> Result<()> {
        if self.config.eviction_policy == EvictionPolicy::NoEviction {
            let needed = ENTRY_OVERHEAD
                + value.size_of()
                + opts
                    .tags
                    .iter()
                    .map(|t| t.len() as i64 + TAG_OVERHEAD)
                    .sum::<i64>();
            if !self.memory.can_allocate(needed) {
                return Err(CacheError::MemoryLimit);
            }
        }

        self.store.set(key, value, opts)?;
        self.sync_deadline(key);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> bool {
        let deleted = self.store.delete(key);
        self.sync_deadline(key);
        deleted
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.exists(key)
    }

    pub fn data_type(&self, key: &str) -> Option<DataType> {
        self.store.data_type(key)
    }

    pub fn ttl(&self, key: &str) -> Ttl {
        self.store.ttl(key)
    }

    pub fn set_ttl(&self, key: &str, ttl: Duration) -> bool {
        if !self.store.set_ttl(key, ttl) {
            return false;
        }
        self.sync_deadline(key);
        true
    }

    /// Set an absolute deadline
    ///
    /// A deadline already past removes the key now; one equal to the current
    /// time is left to the next wheel tick.
    pub fn set_expires_at(&self, key: &str, expires_at: i64) -> bool {
        if !self.store.set_expires_at(key, expires_at) {
            return false;
        }
        let now = self.store.now();
        if expires_at != 0 && expires_at < now {
            self.store.delete_expired(key, now);
        }
        self.sync_deadline(key);
        true
    }

    pub fn persist(&self, key: &str) -> bool {
        let persisted = self.store.persist(key);
        self.sync_deadline(key);
        persisted
    }

    fn sync_deadline(&self, key: &str) {
        self.wheel.sync(key);
    }

    /// Delete every key carrying `tag`, optionally including descendant tags.
    /// Returns the number of keys removed.
    pub fn invalidate_tag(&self, tag: &str, cascade: bool) -> usize {
        let index = self.store.tag_index();
        let mut keys: Vec<String> = if cascade {
            index.invalidate_cascade(tag).into_values().flatten().collect()
        } else {
            index.invalidate(tag)
        };
        keys.sort_unstable();
        keys.dedup();

        let removed = keys.iter().filter(|key| self.delete(key)).count();
        tracing::debug!(target: "tidecache::tags", tag, cascade, removed, "Invalidated tag");
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.key_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> usize {
        let removed = self.store.flush();
        self.wheel.clear();
        removed
    }

    /// Run one eviction pass now
    pub fn evict(&self) -> EvictionRound {
        self.eviction.check_and_evict()
    }

    /// Expire due keys now
    pub fn expire_due(&self) -> usize {
        self.wheel.tick()
    }

    /// Start the expiry wheel and the eviction loop
    pub fn start(&self) -> io::Result<()> {
        self.wheel.start(self.config.wheel_tick())?;

        let mut evictor = self.evictor.lock();
        if evictor.is_none() && self.config.eviction_policy != EvictionPolicy::NoEviction {
            let eviction = Arc::downgrade(&self.eviction);
            *evictor = Some(Worker::spawn(
                "tidecache-evictor",
                self.config.eviction_interval(),
                move || {
                    if let Some(eviction) = eviction.upgrade() {
                        eviction.check_and_evict();
                    }
                },
            )?);
        }
        Ok(())
    }

    /// Stop background work; returns once both loops have exited
    pub fn stop(&self) {
        self.wheel.stop();
        let evictor = self.evictor.lock().take();
        if let Some(mut worker) = evictor {
            worker.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.wheel.is_running() || self.evictor.lock().is_some()
    }

    /// Copy current totals into the prometheus registry
    pub fn refresh_metrics(&self) {
        self.metrics.sync_evictions(self.eviction.stats().evicted);
        self.metrics.sync_expirations(self.wheel.expired_total());
        self.metrics.set_keys(self.store.key_count());
        self.metrics
            .set_memory(self.memory.usage(), self.memory.pressure());
    }

    /// Metrics in the Prometheus text format
    pub fn render_metrics(&self) -> AnyResult<String> {
        self.refresh_metrics();
        self.metrics.render()
    }

    pub fn stats(&self) -> CacheStats {
        let metrics = self.metrics.snapshot();
        CacheStats {
            keys: self.store.key_count(),
            memory_usage: self.memory.usage(),
            max_memory: self.memory.max(),
            pressure: self.memory.pressure(),
            hits: metrics.hits,
            misses: metrics.misses,
            hit_rate: metrics.hit_rate,
            expired: self.wheel.expired_total(),
            tracked_deadlines: self.wheel.len(),
            eviction: self.eviction.stats(),
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("policy", &self.config.eviction_policy)
            .field("keys", &self.store.key_count())
            .field("memory", &self.memory.usage())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manual_cache(config: CacheConfig) -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Cache::with_clock(config, clock.clone()).unwrap();
        (cache, clock)
    }

    #[test]
    fn test_hits_and_misses() {
        let (cache, _) = manual_cache(CacheConfig::default());
        cache.set("a", Value::string("1"), SetOptions::new()).unwrap();

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 1);
    }

    #[test]
    fn test_ttl_registers_with_wheel() {
        let (cache, clock) = manual_cache(CacheConfig::default());
        cache
            .set("k", Value::string("v"), SetOptions::new().ttl(Duration::from_secs(5)))
            .unwrap();
        assert!(cache.wheel().contains("k"));

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.expire_due(), 1);
        assert_eq!(cache.store().key_count(), 0);
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_persist_and_overwrite_clear_deadline() {
        let (cache, _) = manual_cache(CacheConfig::default());
        let ttl = SetOptions::new().ttl(Duration::from_secs(60));

        cache.set("p", Value::string("v"), ttl.clone()).unwrap();
        assert!(cache.persist("p"));
        assert!(!cache.wheel().contains("p"));
        assert_eq!(cache.ttl("p"), Ttl::Persistent);

        cache.set("o", Value::string("v"), ttl).unwrap();
        cache.set("o", Value::string("w"), SetOptions::new()).unwrap();
        assert!(!cache.wheel().contains("o"));

        assert!(cache.set_ttl("o", Duration::from_secs(1)));
        assert!(cache.wheel().contains("o"));
        assert!(!cache.set_ttl("missing", Duration::from_secs(1)));
    }

    #[test]
    fn test_past_deadline_removes_key() {
        let (cache, clock) = manual_cache(CacheConfig::default());
        cache.set("k", Value::string("v"), SetOptions::new()).unwrap();

        assert!(cache.set_expires_at("k", clock.now_nanos() - 1));
        assert!(!cache.exists("k"));
        assert_eq!(cache.memory().usage(), 0);
    }

    #[test]
    fn test_deadline_equal_to_now_is_tracked() {
        let (cache, clock) = manual_cache(CacheConfig::default());
        cache.set("k", Value::string("v"), SetOptions::new()).unwrap();

        assert!(cache.set_expires_at("k", clock.now_nanos()));
        assert!(cache.wheel().contains("k"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.expire_due(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_refill_between_delete_and_wheel_update_stays_tracked() {
        let (cache, clock) = manual_cache(CacheConfig::default());
        let ttl = SetOptions::new().ttl(Duration::from_secs(5));
        cache.set("k", Value::string("old"), ttl.clone()).unwrap();

        // Store half of a delete, a refill with a TTL, then the wheel half
        assert!(cache.store().delete("k"));
        cache.set("k", Value::string("new"), ttl).unwrap();
        cache.sync_deadline("k");
        assert!(cache.wheel().contains("k"));

        // Same ordering for persist racing a TTL refresh
        assert!(cache.store().persist("k"));
        assert!(cache.store().set_ttl("k", Duration::from_secs(5)));
        cache.sync_deadline("k");
        assert!(cache.wheel().contains("k"));

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.expire_due(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_noeviction_refuses_writes() {
        let config = CacheConfig {
            max_memory: "2kb".to_string(),
            eviction_policy: EvictionPolicy::NoEviction,
            ..Default::default()
        };
        let (cache, _) = manual_cache(config);

        let mut refused = None;
        for i in 0..100 {
            let key = format!("key:{}", i);
            if let Err(err) = cache.set(&key, Value::string(vec![0u8; 100]), SetOptions::new()) {
                refused = Some((i, err));
                break;
            }
        }

        let (i, err) = refused.unwrap();
        assert_eq!(err, CacheError::MemoryLimit);
        assert!(i > 0);
        assert!(cache.memory().usage() < 2048);
        assert_eq!(cache.evict().evicted, 0);
    }

    #[test]
    fn test_other_policies_admit_then_evict() {
        let config = CacheConfig {
            max_memory: "2kb".to_string(),
            ..Default::default()
        };
        let (cache, _) = manual_cache(config);
        for i in 0..40 {
            cache
                .set(&format!("key:{}", i), Value::string(vec![0u8; 100]), SetOptions::new())
                .unwrap();
        }
        assert!(cache.memory().usage() > 2048);

        let round = cache.evict();
        assert!(round.evicted > 0);
        assert!(cache.memory().usage() < 2048);
    }

    #[test]
    fn test_evicted_keys_leave_wheel() {
        let config = CacheConfig {
            max_memory: "2kb".to_string(),
            ..Default::default()
        };
        let (cache, _) = manual_cache(config);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        cache.on_evict(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..40 {
            let opts = SetOptions::new().ttl(Duration::from_secs(3600));
            cache
                .set(&format!("key:{}", i), Value::string(vec![0u8; 100]), opts)
                .unwrap();
        }
        assert_eq!(cache.wheel().len(), 40);

        let evicted = cache.evict().evicted;
        assert!(evicted > 0);
        assert_eq!(seen.load(Ordering::SeqCst), evicted);
        assert_eq!(cache.wheel().len(), 40 - evicted);
    }

    #[test]
    fn test_invalidate_tag_cascade() {
        let (cache, _) = manual_cache(CacheConfig::default());
        cache.store().tag_index().link("user", "user:1");
        cache
            .set("a", Value::string("1"), SetOptions::new().tags(["user"]))
            .unwrap();
        cache
            .set("b", Value::string("2"), SetOptions::new().tags(["user:1", "user"]))
            .unwrap();
        cache
            .set("c", Value::string("3"), SetOptions::new().tags(["other"]))
            .unwrap();

        assert_eq!(cache.invalidate_tag("user", true), 2);
        assert_eq!(cache.keys(), vec!["c"]);
        assert_eq!(cache.invalidate_tag("user", false), 0);
    }

    #[test]
    fn test_metrics_render() {
        let (cache, _) = manual_cache(CacheConfig::default());
        cache.set("a", Value::string("1"), SetOptions::new()).unwrap();
        cache.get("a");

        let text = cache.render_metrics().unwrap();
        assert!(text.contains("tidecache_keys 1"));
        assert!(text.contains("tidecache_hits_total 1"));
    }

    #[test]
    fn test_start_stop() {
        let config = CacheConfig {
            wheel_tick_ms: 5,
            eviction_interval_ms: 5,
            ..Default::default()
        };
        let cache = Cache::new(config).unwrap();
        cache.start().unwrap();
        assert!(cache.is_running());
        cache.stop();
        assert!(!cache.is_running());
    }

    #[test]
    fn test_flush() {
        let (cache, _) = manual_cache(CacheConfig::default());
        cache
            .set("a", Value::string("1"), SetOptions::new().ttl(Duration::from_secs(9)))
            .unwrap();
        cache.set("b", Value::string("2"), SetOptions::new()).unwrap();

        assert_eq!(cache.flush(), 2);
        assert!(cache.is_empty());
        assert!(cache.wheel().is_empty());
        assert_eq!(cache.memory().usage(), 0);
    }
}
