//! Individual store shard
//!
//! Each shard owns a slice of the key space together with its running key
//! count and memory usage. Counters and map are updated under the same write
//! lock so they always agree.

use crate::cache::entry::Entry;
use crate::error::Result;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Slot {
    entry: Arc<Entry>,
    /// Bytes added to the counters when this entry was written
    charged: i64,
}

#[derive(Debug, Default)]
struct ShardInner {
    map: HashMap<String, Slot>,
    key_count: usize,
    mem_usage: i64,
}

impl ShardInner {
    fn take(&mut self, key: &str) -> Option<(Arc<Entry>, i64)> {
        let slot = self.map.remove(key)?;
        self.key_count -= 1;
        self.mem_usage -= slot.charged;
        Some((slot.entry, slot.charged))
    }
}

/// Result of a write into a shard
#[derive(Debug)]
pub struct ShardWrite {
    /// Signed change in memory usage
    pub delta: i64,
    /// Entry that was replaced, if any
    pub previous: Option<Arc<Entry>>,
}

/// Result of a conditional removal
#[derive(Debug)]
pub enum Removal {
    /// Entry removed, with the bytes freed
    Removed(Arc<Entry>, i64),
    /// Key present but the predicate rejected it
    Rejected,
    Absent,
}

/// One stripe of the key space guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct Shard {
    inner: RwLock<ShardInner>,
    operation_count: AtomicU64,
}

impl Shard {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_op(&self) {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, key: &str) -> Option<Arc<Entry>> {
        self.record_op();
        self.inner.read().map.get(key).map(|slot| slot.entry.clone())
    }

    /// Insert or replace an entry unconditionally
    pub fn set(&self, key: &str, entry: Arc<Entry>) -> ShardWrite {
        self.record_op();
        let mut inner = self.inner.write();
        write_slot(&mut inner, key, entry)
    }

    /// Insert under a single write lock, letting `build` inspect the current
    /// entry first. An error from `build` leaves the shard untouched.
    pub fn insert_with<F>(&self, key: &str, build: F) -> Result<ShardWrite>
    where
        F: FnOnce(Option<&Arc<Entry>>) -> Result<Arc<Entry>>,
    {
        self.record_op();
        let mut inner = self.inner.write();
        let entry = build(inner.map.get(key).map(|slot| &slot.entry))?;
        Ok(write_slot(&mut inner, key, entry))
    }

    /// Remove a key, returning the entry and the bytes freed
    pub fn delete(&self, key: &str) -> Option<(Arc<Entry>, i64)> {
        self.record_op();
        self.inner.write().take(key)
    }

    /// Remove a key only if `predicate` accepts the live entry
    pub fn remove_if<F>(&self, key: &str, predicate: F) -> Removal
    where
        F: FnOnce(&Entry) -> bool,
    {
        self.record_op();
        let mut inner = self.inner.write();
        let accepted = match inner.map.get(key) {
            Some(slot) => predicate(&slot.entry),
            None => return Removal::Absent,
        };
        if !accepted {
            return Removal::Rejected;
        }
        match inner.take(key) {
            Some((entry, freed)) => Removal::Removed(entry, freed),
            None => Removal::Absent,
        }
    }

    /// Run `f` on the current entry while holding the shard read lock
    pub fn inspect<F, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce(Option<&Entry>) -> T,
    {
        let inner = self.inner.read();
        f(inner.map.get(key).map(|slot| slot.entry.as_ref()))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.inner.read().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().key_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem_usage(&self) -> i64 {
        self.inner.read().mem_usage
    }

    /// Snapshot of keys and entries
    pub fn entries(&self) -> Vec<(String, Arc<Entry>)> {
        self.inner
            .read()
            .map
            .iter()
            .map(|(k, slot)| (k.clone(), slot.entry.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().map.keys().cloned().collect()
    }

    /// Pick one entry accepted by `filter`, scanning from a random position
    pub fn sample<R, F>(&self, rng: &mut R, filter: F) -> Option<(String, Arc<Entry>)>
    where
        R: Rng,
        F: Fn(&Entry) -> bool,
    {
        let inner = self.inner.read();
        let len = inner.map.len();
        if len == 0 {
            return None;
        }
        let start = rng.gen_range(0..len);
        inner
            .map
            .iter()
            .skip(start)
            .chain(inner.map.iter().take(start))
            .find(|(_, slot)| filter(&slot.entry))
            .map(|(k, slot)| (k.clone(), slot.entry.clone()))
    }

    /// Drop every key, returning the count removed and the bytes freed
    pub fn flush(&self) -> (usize, i64) {
        self.record_op();
        let mut inner = self.inner.write();
        let removed = (inner.key_count, inner.mem_usage);
        *inner = ShardInner::default();
        removed
    }

    pub fn stats(&self) -> ShardStats {
        let inner = self.inner.read();
        ShardStats {
            operation_count: self.operation_count.load(Ordering::Relaxed),
            key_count: inner.key_count,
            mem_usage: inner.mem_usage,
        }
    }
}

fn write_slot(inner: &mut ShardInner, key: &str, entry: Arc<Entry>) -> ShardWrite {
    let charged = entry.memory_usage();
    let slot = Slot { entry, charged };
    match inner.map.insert(key.to_string(), slot) {
        Some(old) => {
            let delta = charged - old.charged;
            inner.mem_usage += delta;
            ShardWrite {
                delta,
                previous: Some(old.entry),
            }
        }
        None => {
            inner.key_count += 1;
            inner.mem_usage += charged;
            ShardWrite {
                delta: charged,
                previous: None,
            }
        }
    }
}

/// Shard statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStats {
    pub operation_count: u64,
    pub key_count: usize,
    pub mem_usage: i64,
}
