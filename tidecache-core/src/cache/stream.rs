//! Append-only stream (Redis STREAM) with consumer groups

use crate::error::{CacheError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stream entry ID `<milliseconds>-<sequence>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse a range bound, accepting `-` and `+`
    pub fn parse_bound(raw: &str) -> Result<Self> {
        match raw {
            "-" => Ok(Self::MIN),
            "+" => Ok(Self::MAX),
            other => other.parse(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CacheError::Stream(format!("invalid stream ID: {}", s));
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (s, None),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = match seq {
            Some(seq) => seq.parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { ms, seq })
    }
}

/// One stream record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: BTreeMap<String, Vec<u8>>,
}

/// Delivered but unacknowledged entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    pub consumer: String,
    pub delivered_at_ms: u64,
    pub deliveries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub name: String,
    pub seen_ms: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub name: String,
    pub last_id: StreamId,
    consumers: BTreeMap<String, Consumer>,
    pending: BTreeMap<StreamId, PendingEntry>,
}

impl ConsumerGroup {
    fn new(name: String, last_id: StreamId) -> Self {
        Self {
            name,
            last_id,
            consumers: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Register a consumer if it does not exist yet
    pub fn consumer(&mut self, name: &str, now_ms: u64) -> &mut Consumer {
        self.consumers
            .entry(name.to_string())
            .or_insert_with(|| Consumer {
                name: name.to_string(),
                seen_ms: now_ms,
                pending: 0,
            })
    }

    /// Record a delivery of `id` to `consumer`
    pub fn add_pending(&mut self, id: StreamId, consumer: &str, now_ms: u64) {
        self.consumer(consumer, now_ms).pending += 1;
        if let Some(previous) = self.pending.insert(
            id,
            PendingEntry {
                id,
                consumer: consumer.to_string(),
                delivered_at_ms: now_ms,
                deliveries: 1,
            },
        ) {
            self.release(&previous.consumer);
        }
    }

    /// Acknowledge an entry, returns true if it was pending
    pub fn ack(&mut self, id: StreamId) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                self.release(&entry.consumer);
                true
            }
            None => false,
        }
    }

    /// Transfer ownership of pending entries, returns the IDs claimed
    pub fn claim(&mut self, ids: &[StreamId], new_consumer: &str, now_ms: u64) -> Vec<StreamId> {
        self.consumer(new_consumer, now_ms);
        let mut claimed = Vec::new();
        for id in ids {
            let Some(entry) = self.pending.get_mut(id) else {
                continue;
            };
            let previous = std::mem::replace(&mut entry.consumer, new_consumer.to_string());
            entry.delivered_at_ms = now_ms;
            entry.deliveries += 1;
            self.release(&previous);
            if let Some(c) = self.consumers.get_mut(new_consumer) {
                c.pending += 1;
            }
            claimed.push(*id);
        }
        claimed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingEntry> {
        self.pending.values()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.values()
    }

    fn release(&mut self, consumer: &str) {
        if let Some(c) = self.consumers.get_mut(consumer) {
            c.pending = c.pending.saturating_sub(1);
        }
    }
}

/// Append-only stream with monotonic IDs and optional max-length trimming
#[derive(Debug, Clone, Default)]
pub struct StreamValue {
    entries: Vec<StreamEntry>,
    last_id: StreamId,
    max_len: usize,
    groups: BTreeMap<String, ConsumerGroup>,
}

impl StreamValue {
    /// Create a stream; `max_len == 0` disables trimming
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }

    /// Append an entry
    ///
    /// `id == None` generates `<now_ms>-<seq>` strictly greater than the last ID.
    /// Explicit IDs must be greater than the current top item.
    pub fn add(
        &mut self,
        id: Option<StreamId>,
        fields: BTreeMap<String, Vec<u8>>,
        now_ms: u64,
    ) -> Result<StreamId> {
        let id = match id {
            Some(id) => {
                if id == StreamId::MIN {
                    return Err(CacheError::Stream(
                        "The ID specified in XADD must be greater than 0-0".to_string(),
                    ));
                }
                if id <= self.last_id {
                    return Err(CacheError::Stream(
                        "The ID specified in XADD is equal or smaller than the target stream top item"
                            .to_string(),
                    ));
                }
                id
            }
            None => self.next_id(now_ms)?,
        };

        self.entries.push(StreamEntry { id, fields });
        self.last_id = id;

        if self.max_len > 0 && self.entries.len() > self.max_len {
            let excess = self.entries.len() - self.max_len;
            self.entries.drain(..excess);
        }

        Ok(id)
    }

    fn next_id(&self, now_ms: u64) -> Result<StreamId> {
        if now_ms > self.last_id.ms {
            return Ok(StreamId::new(now_ms, 0));
        }
        match self.last_id.seq.checked_add(1) {
            Some(seq) => Ok(StreamId::new(self.last_id.ms, seq)),
            None => self
                .last_id
                .ms
                .checked_add(1)
                .map(|ms| StreamId::new(ms, 0))
                .ok_or_else(|| CacheError::Stream("stream ID space exhausted".to_string())),
        }
    }

    /// Entries with `start <= id <= end`; `count == 0` means unlimited
    pub fn range(&self, start: StreamId, end: StreamId, count: usize) -> Vec<StreamEntry> {
        let limit = if count == 0 { usize::MAX } else { count };
        self.entries
            .iter()
            .filter(|e| e.id >= start && e.id <= end)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries strictly after `id`
    pub fn entries_after(&self, id: StreamId, count: usize) -> Vec<StreamEntry> {
        let limit = if count == 0 { usize::MAX } else { count };
        self.entries
            .iter()
            .filter(|e| e.id > id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(&id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Delete the given IDs, returns the number removed
    pub fn delete(&mut self, ids: &[StreamId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        before - self.entries.len()
    }

    /// Keep only the newest `max_len` entries, returns the number removed
    pub fn trim(&mut self, max_len: usize) -> usize {
        if max_len >= self.entries.len() {
            return 0;
        }
        let excess = self.entries.len() - max_len;
        self.entries.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Create a consumer group; `last_id == None` starts at the current top (`$`)
    pub fn create_group(&mut self, name: &str, last_id: Option<StreamId>) -> Result<()> {
        if self.groups.contains_key(name) {
            return Err(CacheError::KeyAlreadyExists);
        }
        let start = last_id.unwrap_or(self.last_id);
        self.groups
            .insert(name.to_string(), ConsumerGroup::new(name.to_string(), start));
        Ok(())
    }

    pub fn destroy_group(&mut self, name: &str) -> bool {
        self.groups.remove(name).is_some()
    }

    pub fn group(&self, name: &str) -> Option<&ConsumerGroup> {
        self.groups.get(name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut ConsumerGroup> {
        self.groups.get_mut(name)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn size_of(&self) -> i64 {
        let entries: i64 = self
            .entries
            .iter()
            .map(|e| {
                let id_len = e.id.to_string().len() as i64;
                let fields: i64 = e
                    .fields
                    .iter()
                    .map(|(k, v)| (k.len() + v.len()) as i64 + 80)
                    .sum();
                id_len + 32 + fields
            })
            .sum();
        entries + 48
    }
}
