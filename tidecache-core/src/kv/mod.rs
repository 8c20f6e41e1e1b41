//! Sharded key-value store
//!
//! Keys are spread over 256 independently locked shards selected with FNV-1a.
//! The store owns the tag index and, when one is attached, keeps the global
//! [`MemoryTracker`] in step with the per-shard counters.

pub mod namespace;
pub mod shard;

pub use namespace::*;
pub use shard::*;

use crate::cache::data_structures::{DataType, Value};
use crate::cache::entry::{Entry, Ttl};
use crate::cache::tag_index::TagIndex;
use crate::clock::{duration_nanos, system_clock, SharedClock};
use crate::error::{CacheError, Result};
use crate::memory::MemoryTracker;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Number of store shards (power of two)
pub const SHARD_COUNT: usize = 256;
const SHARD_MASK: u32 = (SHARD_COUNT - 1) as u32;

const FNV_OFFSET: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// 32-bit FNV-1a hash
pub fn fnv1a(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Options for [`Store::set`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time to live; `None` or zero means no expiry
    pub ttl: Option<Duration>,
    /// Only set if the key does not exist
    pub nx: bool,
    /// Only set if the key already exists
    pub xx: bool,
    /// Keep the current deadline when no TTL is given
    pub keep_ttl: bool,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn nx(mut self) -> Self {
        self.nx = true;
        self
    }

    pub fn xx(mut self) -> Self {
        self.xx = true;
        self
    }

    pub fn keep_ttl(mut self) -> Self {
        self.keep_ttl = true;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|d| !d.is_zero())
    }
}

/// Outcome of a delete issued by the store, eviction or expiry
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    /// Entry removed; carries the removed entry
    Deleted(Arc<Entry>),
    NotFound,
    /// Key was rewritten or accessed after it was observed, nothing removed
    Stale,
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted(_))
    }
}

/// Sharded in-memory store
#[derive(Debug)]
pub struct Store {
    shards: Vec<Shard>,
    tags: TagIndex,
    memory: Option<Arc<MemoryTracker>>,
    clock: SharedClock,
}

impl Store {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::new()).collect(),
            tags: TagIndex::new(),
            memory: None,
            clock,
        }
    }

    /// Attach a tracker that receives every memory delta from now on
    pub fn with_memory_tracker(mut self, tracker: Arc<MemoryTracker>) -> Self {
        self.memory = Some(tracker);
        self
    }

    pub fn shard_index(key: &str) -> usize {
        (fnv1a(key.as_bytes()) & SHARD_MASK) as usize
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[Self::shard_index(key)]
    }

    pub fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn charge(&self, delta: i64) {
        if let Some(tracker) = &self.memory {
            tracker.add(delta);
        }
    }

    /// Fetch a live entry and record the access
    ///
    /// An expired entry is removed on the spot and reported as absent.
    pub fn get(&self, key: &str) -> Option<Arc<Entry>> {
        let now = self.now();
        let entry = self.live(key, now)?;
        entry.touch(now);
        Some(entry)
    }

    /// Fetch a live entry without touching it
    pub fn peek(&self, key: &str) -> Option<Arc<Entry>> {
        self.live(key, self.now())
    }

    fn live(&self, key: &str, now: i64) -> Option<Arc<Entry>> {
        let entry = self.shard(key).get(key)?;
        if entry.is_expired(now) {
            self.delete_expired(key, now);
            return None;
        }
        Some(entry)
    }

    /// Store `value` under `key`
    ///
    /// NX and XX are decided under the shard write lock together with the
    /// write; an expired entry counts as absent. Tags are indexed under the
    /// same lock before the entry becomes visible, and tags of a replaced
    /// entry that the new entry does not carry are dropped from the index.
    /// A refused write leaves the index untouched.
    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> Result<()> {
        let now = self.now();
        let ttl = opts.effective_ttl();
        let SetOptions {
            nx,
            xx,
            keep_ttl,
            tags,
            ..
        } = opts;

        let write = self.shard(key).insert_with(key, |current| {
            let live = current.filter(|e| !e.is_expired(now));
            match live {
                Some(_) if nx => return Err(CacheError::KeyAlreadyExists),
                None if xx => return Err(CacheError::KeyNotFound),
                _ => {}
            }

            let expires_at = match (ttl, live) {
                (Some(ttl), _) => now.saturating_add(duration_nanos(ttl)),
                (None, Some(existing)) if keep_ttl => existing.expires_at(),
                _ => 0,
            };

            if !tags.is_empty() {
                self.tags.add_tags(key, &tags);
            }
            if let Some(previous) = current {
                let stale: Vec<&String> = previous
                    .tags()
                    .iter()
                    .filter(|t| !tags.contains(t))
                    .collect();
                if !stale.is_empty() {
                    self.tags.remove_tags(key, &stale);
                }
            }

            Ok(Arc::new(
                Entry::new(value, now)
                    .with_tags(tags.clone())
                    .with_expires_at(expires_at),
            ))
        })?;

        self.charge(write.delta);
        Ok(())
    }

    /// Install a prebuilt entry without TTL or tag side effects
    pub fn set_entry(&self, key: &str, entry: Entry) {
        let write = self.shard(key).set(key, Arc::new(entry));
        self.charge(write.delta);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.remove(key).is_deleted()
    }

    /// Remove a key and scrub its tags, returning the removed entry
    pub fn remove(&self, key: &str) -> DeleteOutcome {
        match self.shard(key).delete(key) {
            Some((entry, freed)) => {
                self.finish_removal(key, &entry, freed);
                DeleteOutcome::Deleted(entry)
            }
            None => DeleteOutcome::NotFound,
        }
    }

    /// Remove an eviction candidate only if it is unchanged since it was sampled
    pub fn evict_candidate(&self, key: &str, observed: &Entry) -> DeleteOutcome {
        let created_at = observed.created_at();
        let last_access = observed.last_access();
        let removal = self.shard(key).remove_if(key, |live| {
            live.created_at() == created_at && live.last_access() == last_access
        });
        self.conclude(key, removal)
    }

    /// Remove `key` only if its live entry has expired by `now`
    pub fn delete_expired(&self, key: &str, now: i64) -> bool {
        let removal = self.shard(key).remove_if(key, |live| live.is_expired(now));
        self.conclude(key, removal).is_deleted()
    }

    fn conclude(&self, key: &str, removal: Removal) -> DeleteOutcome {
        match removal {
            Removal::Removed(entry, freed) => {
                self.finish_removal(key, &entry, freed);
                DeleteOutcome::Deleted(entry)
            }
            Removal::Rejected => DeleteOutcome::Stale,
            Removal::Absent => DeleteOutcome::NotFound,
        }
    }

    fn finish_removal(&self, key: &str, entry: &Entry, freed: i64) {
        if !entry.tags().is_empty() {
            // A writer may have re-created the key since it was taken; its
            // tags stay indexed. Tag updates for a key happen under its shard lock.
            self.shard(key).inspect(key, |live| {
                let gone: Vec<&String> = entry
                    .tags()
                    .iter()
                    .filter(|t| live.map_or(true, |e| !e.has_tag(t)))
                    .collect();
                if !gone.is_empty() {
                    self.tags.remove_tags(key, &gone);
                }
            });
        }
        self.charge(-freed);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Type of the value at `key`, `None` when absent
    pub fn data_type(&self, key: &str) -> Option<DataType> {
        self.peek(key).map(|e| e.data_type())
    }

    pub fn ttl(&self, key: &str) -> Ttl {
        let now = self.now();
        match self.live(key, now) {
            Some(entry) => entry.ttl(now),
            None => Ttl::Missing,
        }
    }

    /// Expire `key` after `ttl`; false if the key is absent
    pub fn set_ttl(&self, key: &str, ttl: Duration) -> bool {
        let now = self.now();
        self.set_expires_at_with(key, now, now.saturating_add(duration_nanos(ttl)))
    }

    /// Expire `key` at an absolute epoch-nanosecond deadline
    pub fn set_expires_at(&self, key: &str, expires_at: i64) -> bool {
        self.set_expires_at_with(key, self.now(), expires_at)
    }

    fn set_expires_at_with(&self, key: &str, now: i64, expires_at: i64) -> bool {
        match self.live(key, now) {
            Some(entry) => {
                entry.set_expires_at(expires_at);
                true
            }
            None => false,
        }
    }

    /// Clear the deadline of `key`; false if the key is absent
    pub fn persist(&self, key: &str) -> bool {
        self.set_expires_at_with(key, self.now(), 0)
    }

    pub fn key_count(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn mem_usage(&self) -> i64 {
        self.shards.iter().map(Shard::mem_usage).sum()
    }

    /// Snapshot of all live keys
    pub fn keys(&self) -> Vec<String> {
        let now = self.now();
        self.shards
            .iter()
            .flat_map(|shard| shard.entries())
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key)
            .collect()
    }

    /// Drop every key and the whole tag index, returning the count removed
    pub fn flush(&self) -> usize {
        let (removed, freed) = self
            .shards
            .iter()
            .map(Shard::flush)
            .fold((0, 0), |(n, b), (sn, sb)| (n + sn, b + sb));
        self.tags.clear();
        self.charge(-freed);
        removed
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_at(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    /// Sample one entry from a uniformly chosen shard
    pub fn sample<R, F>(&self, rng: &mut R, filter: F) -> Option<(String, Arc<Entry>)>
    where
        R: Rng,
        F: Fn(&Entry) -> bool,
    {
        let index = rng.gen_range(0..self.shards.len());
        self.shards[index].sample(rng, filter)
    }

    /// Sample from the first non-empty shard after a random start
    pub fn sample_any<R: Rng>(&self, rng: &mut R) -> Option<(String, Arc<Entry>)> {
        let start = rng.gen_range(0..self.shards.len());
        (0..self.shards.len())
            .map(|offset| &self.shards[(start + offset) % self.shards.len()])
            .find_map(|shard| shard.sample(rng, |_| true))
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    pub fn memory_tracker(&self) -> Option<&Arc<MemoryTracker>> {
        self.memory.as_ref()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
