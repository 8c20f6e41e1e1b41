//! Cache entry: a value plus expiry, tags and access telemetry

use crate::cache::data_structures::{DataType, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Fixed bookkeeping overhead charged per entry
pub const ENTRY_OVERHEAD: i64 = 64;
/// Overhead charged per tag on top of the tag length
pub const TAG_OVERHEAD: i64 = 16;

/// Remaining time-to-live of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key does not exist (or has expired)
    Missing,
    /// Key exists without a deadline
    Persistent,
    /// Time until the key expires
    Remaining(Duration),
}

impl Ttl {
    /// Redis integer form: -2 missing, -1 persistent, else milliseconds
    pub fn as_millis_i64(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Ttl::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

/// A stored value with its metadata
///
/// Entries are shared between the shard map and readers as `Arc<Entry>`.
/// Access telemetry and the expiry deadline are atomics so reads can touch an
/// entry and TTL commands can move its deadline while holding only a read lock.
#[derive(Debug)]
pub struct Entry {
    value: Value,
    tags: Vec<String>,
    expires_at: AtomicI64,
    created_at: i64,
    last_access: AtomicI64,
    access_count: AtomicU64,
}

impl Entry {
    /// Wrap a value, created and last accessed at `now` (epoch nanoseconds)
    pub fn new(value: Value, now: i64) -> Self {
        Self {
            value,
            tags: Vec::new(),
            expires_at: AtomicI64::new(0),
            created_at: now,
            last_access: AtomicI64::new(now),
            access_count: AtomicU64::new(0),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_expires_at(self, expires_at: i64) -> Self {
        self.expires_at.store(expires_at.max(0), Ordering::Relaxed);
        self
    }

    /// Restore telemetry, used when rebuilding entries from a snapshot
    pub fn with_telemetry(mut self, created_at: i64, last_access: i64, access_count: u64) -> Self {
        self.created_at = created_at;
        self.last_access = AtomicI64::new(last_access);
        self.access_count = AtomicU64::new(access_count);
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Absolute deadline in epoch nanoseconds, 0 when the entry never expires
    pub fn expires_at(&self) -> i64 {
        self.expires_at.load(Ordering::Acquire)
    }

    pub fn set_expires_at(&self, expires_at: i64) {
        self.expires_at.store(expires_at.max(0), Ordering::Release);
    }

    pub fn has_ttl(&self) -> bool {
        self.expires_at() != 0
    }

    pub fn is_expired(&self, now: i64) -> bool {
        let deadline = self.expires_at();
        deadline != 0 && now > deadline
    }

    pub fn ttl(&self, now: i64) -> Ttl {
        let deadline = self.expires_at();
        if deadline == 0 {
            return Ttl::Persistent;
        }
        if now > deadline {
            return Ttl::Missing;
        }
        Ttl::Remaining(Duration::from_nanos((deadline - now) as u64))
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_access(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Record a read; last access never moves backwards
    pub fn touch(&self, now: i64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes charged against the memory budget for this entry
    pub fn memory_usage(&self) -> i64 {
        let tags: i64 = self
            .tags
            .iter()
            .map(|t| t.len() as i64 + TAG_OVERHEAD)
            .sum();
        ENTRY_OVERHEAD + self.value.size_of() + tags
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            tags: self.tags.clone(),
            expires_at: AtomicI64::new(self.expires_at()),
            created_at: self.created_at,
            last_access: AtomicI64::new(self.last_access()),
            access_count: AtomicU64::new(self.access_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000_000;

    #[test]
    fn test_entry_without_ttl() {
        let entry = Entry::new(Value::string("x"), 10 * SEC);
        assert!(!entry.has_ttl());
        assert!(!entry.is_expired(i64::MAX));
        assert_eq!(entry.ttl(100 * SEC), Ttl::Persistent);
        assert_eq!(entry.ttl(100 * SEC).as_millis_i64(), -1);
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = Entry::new(Value::string("x"), 0).with_expires_at(5 * SEC);
        assert!(!entry.is_expired(5 * SEC));
        assert!(entry.is_expired(5 * SEC + 1));
        assert_eq!(entry.ttl(3 * SEC), Ttl::Remaining(Duration::from_secs(2)));
        assert_eq!(entry.ttl(6 * SEC), Ttl::Missing);
        assert_eq!(Ttl::Missing.as_millis_i64(), -2);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let entry = Entry::new(Value::string("x"), 10);
        entry.touch(20);
        entry.touch(15);
        assert_eq!(entry.last_access(), 20);
        assert_eq!(entry.access_count(), 2);
    }

    #[test]
    fn test_memory_usage() {
        let entry = Entry::new(Value::string("hello"), 0)
            .with_tags(vec!["ab".to_string(), "cde".to_string()]);
        assert_eq!(entry.memory_usage(), 64 + (5 + 24) + (2 + 16) + (3 + 16));
    }

    #[test]
    fn test_clone_copies_telemetry() {
        let entry = Entry::new(Value::string("x"), 1).with_expires_at(100);
        entry.touch(50);
        let copy = entry.clone();
        copy.touch(60);
        copy.set_expires_at(0);

        assert_eq!(entry.access_count(), 1);
        assert_eq!(copy.access_count(), 2);
        assert_eq!(entry.expires_at(), 100);
        assert_eq!(copy.expires_at(), 0);
    }
}
