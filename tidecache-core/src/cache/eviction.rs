//! Memory-pressure driven eviction
//!
//! Victims are chosen by sampling: a handful of uniformly random shards each
//! contribute one candidate and the policy picks the worst of them. Ordering
//! is approximate by construction.

use crate::cache::entry::Entry;
use crate::error::CacheError;
use crate::kv::{DeleteOutcome, Store};
use crate::memory::{MemoryTracker, PressureLevel};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fraction of max memory that an emergency round evicts down to
pub const EMERGENCY_TARGET_PCT: f64 = 0.85;
/// Keys evicted per round under critical pressure
pub const CRITICAL_BATCH: usize = 100;
/// Keys evicted per round under warning pressure
pub const WARNING_BATCH: usize = 10;

// Selections retried when the chosen victim changed or vanished before removal
const MAX_ATTEMPTS: usize = 3;

/// Cache eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Never evict; writes may be refused instead
    #[serde(rename = "noeviction")]
    NoEviction,
    /// Least recently used over all keys
    #[default]
    #[serde(rename = "allkeys-lru")]
    AllKeysLru,
    /// Least frequently used over all keys
    #[serde(rename = "allkeys-lfu")]
    AllKeysLfu,
    /// Least recently used among keys with a TTL, falling back to all keys
    #[serde(rename = "volatile-lru")]
    VolatileLru,
    /// Uniformly random key
    #[serde(rename = "allkeys-random")]
    AllKeysRandom,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noeviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
            "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
            other => Err(CacheError::Config(format!(
                "unknown eviction policy: {}",
                other
            ))),
        }
    }
}

/// Observer invoked once for every evicted key
pub type EvictCallback = Arc<dyn Fn(&str, &Entry) + Send + Sync>;

/// Eviction statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionStats {
    /// Victim selections attempted
    pub attempts: u64,
    /// Keys evicted
    pub evicted: u64,
    /// Victims skipped because they changed after sampling
    pub stale: u64,
    /// Victims that were already gone
    pub not_found: u64,
    /// Bytes released by eviction
    pub bytes_evicted: u64,
}

#[derive(Debug, Default)]
struct EvictionCounters {
    attempts: AtomicU64,
    evicted: AtomicU64,
    stale: AtomicU64,
    not_found: AtomicU64,
    bytes_evicted: AtomicU64,
}

impl EvictionCounters {
    fn snapshot(&self) -> EvictionStats {
        EvictionStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            bytes_evicted: self.bytes_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Summary of one `check_and_evict` pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionRound {
    pub pressure: PressureLevel,
    pub evicted: usize,
    pub freed_bytes: i64,
}

struct Candidate {
    key: String,
    entry: Arc<Entry>,
}

pub struct EvictionController {
    policy: EvictionPolicy,
    store: Arc<Store>,
    memory: Arc<MemoryTracker>,
    sample_size: usize,
    on_evict: RwLock<Option<EvictCallback>>,
    rng: Mutex<StdRng>,
    counters: EvictionCounters,
}

impl EvictionController {
    pub fn new(
        policy: EvictionPolicy,
        store: Arc<Store>,
        memory: Arc<MemoryTracker>,
        sample_size: usize,
    ) -> Self {
        Self::with_rng(policy, store, memory, sample_size, StdRng::from_entropy())
    }

    /// Controller with a caller-provided RNG, for reproducible sampling
    pub fn with_rng(
        policy: EvictionPolicy,
        store: Arc<Store>,
        memory: Arc<MemoryTracker>,
        sample_size: usize,
        rng: StdRng,
    ) -> Self {
        Self {
            policy,
            store,
            memory,
            sample_size: sample_size.max(1),
            on_evict: RwLock::new(None),
            rng: Mutex::new(rng),
            counters: EvictionCounters::default(),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Register the eviction observer, replacing any previous one
    pub fn on_evict<F>(&self, callback: F)
    where
        F: Fn(&str, &Entry) + Send + Sync + 'static,
    {
        *self.on_evict.write() = Some(Arc::new(callback));
    }

    pub fn stats(&self) -> EvictionStats {
        self.counters.snapshot()
    }

    /// Evict according to the current memory pressure
    pub fn check_and_evict(&self) -> EvictionRound {
        if !self.memory.is_limited() {
            return EvictionRound {
                pressure: PressureLevel::Normal,
                evicted: 0,
                freed_bytes: 0,
            };
        }

        let pressure = self.memory.pressure();
        let usage_before = self.memory.usage();
        let evicted = match pressure {
            PressureLevel::Emergency => self.evict_until(EMERGENCY_TARGET_PCT),
            PressureLevel::Critical => self.evict_keys(CRITICAL_BATCH),
            PressureLevel::Warning => self.evict_keys(WARNING_BATCH),
            PressureLevel::Normal => 0,
        };
        let round = EvictionRound {
            pressure,
            evicted,
            freed_bytes: usage_before - self.memory.usage(),
        };

        if evicted > 0 {
            tracing::debug!(
                target: "tidecache::eviction",
                pressure = %pressure,
                policy = %self.policy,
                evicted,
                freed_bytes = round.freed_bytes,
                "Eviction round complete"
            );
        }
        round
    }

    fn evict_until(&self, target_pct: f64) -> usize {
        let target = (self.memory.max() as f64 * target_pct) as i64;
        let mut evicted = 0;
        while self.memory.usage() > target {
            if !self.evict_one() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn evict_keys(&self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count && self.evict_one() {
            evicted += 1;
        }
        evicted
    }

    /// Evict up to `n` keys regardless of pressure
    pub fn force_evict(&self, n: usize) -> usize {
        self.evict_keys(n)
    }

    /// Select and remove one victim
    ///
    /// Returns false when nothing could be evicted: the policy forbids it, the
    /// store is empty, or every selected victim changed before removal.
    pub fn evict_one(&self) -> bool {
        if self.policy == EvictionPolicy::NoEviction {
            return false;
        }

        for _ in 0..MAX_ATTEMPTS {
            let Some(victim) = self.select_victim() else {
                return false;
            };
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);

            match self.store.evict_candidate(&victim.key, &victim.entry) {
                DeleteOutcome::Deleted(entry) => {
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_evicted
                        .fetch_add(entry.memory_usage().max(0) as u64, Ordering::Relaxed);
                    tracing::trace!(target: "tidecache::eviction", key = %victim.key, "Evicted key");

                    let callback = self.on_evict.read().clone();
                    if let Some(callback) = callback {
                        callback(&victim.key, &entry);
                    }
                    return true;
                }
                DeleteOutcome::Stale => {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                }
                DeleteOutcome::NotFound => {
                    self.counters.not_found.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        false
    }

    fn select_victim(&self) -> Option<Candidate> {
        let mut rng = self.rng.lock();
        match self.policy {
            EvictionPolicy::NoEviction => None,
            EvictionPolicy::AllKeysLru => self.select_lru(&mut *rng),
            EvictionPolicy::AllKeysLfu => {
                min_by_key(self.sample_keys(&mut *rng), Entry::access_count)
            }
            EvictionPolicy::VolatileLru => {
                let volatile = self.sample_volatile_keys(&mut *rng);
                if volatile.is_empty() {
                    self.select_lru(&mut *rng)
                } else {
                    min_by_key(volatile, Entry::last_access)
                }
            }
            EvictionPolicy::AllKeysRandom => self.select_random(&mut *rng),
        }
    }

    fn select_lru(&self, rng: &mut StdRng) -> Option<Candidate> {
        min_by_key(self.sample_keys(rng), Entry::last_access)
    }

    fn select_random(&self, rng: &mut StdRng) -> Option<Candidate> {
        let keys = self.store.keys();
        if keys.is_empty() {
            return None;
        }
        let key = keys[rng.gen_range(0..keys.len())].clone();
        let entry = self.store.peek(&key)?;
        Some(Candidate { key, entry })
    }

    /// One candidate from each of `sample_size` random shards; empty shards
    /// contribute nothing and the same key may appear twice. When every pick
    /// lands on an empty shard the first non-empty shard after a random start
    /// supplies the candidate, so a non-empty store always yields one.
    fn sample_keys(&self, rng: &mut StdRng) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = (0..self.sample_size)
            .filter_map(|_| self.store.sample(rng, |_| true))
            .map(|(key, entry)| Candidate { key, entry })
            .collect();
        if candidates.is_empty() {
            if let Some((key, entry)) = self.store.sample_any(rng) {
                candidates.push(Candidate { key, entry });
            }
        }
        candidates
    }

    fn sample_volatile_keys(&self, rng: &mut StdRng) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(self.sample_size);
        for _ in 0..self.sample_size * 2 {
            if candidates.len() >= self.sample_size {
                break;
            }
            if let Some((key, entry)) = self.store.sample(rng, Entry::has_ttl) {
                candidates.push(Candidate { key, entry });
            }
        }
        candidates
    }
}

impl fmt::Debug for EvictionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionController")
            .field("policy", &self.policy)
            .field("sample_size", &self.sample_size)
            .field("stats", &self.stats())
            .finish()
    }
}

fn min_by_key<K, F>(candidates: Vec<Candidate>, key: F) -> Option<Candidate>
where
    K: Ord,
    F: Fn(&Entry) -> K,
{
    candidates.into_iter().min_by_key(|c| key(&c.entry))
}
