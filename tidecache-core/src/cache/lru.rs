//! Bounded LRU map
//!
//! Nodes live in a `Vec` arena and link to each other by index; freed slots
//! are recycled through a free list.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug)]
struct Node {
    key: String,
    value: String,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct LruInner {
    nodes: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruInner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn allocate(&mut self, key: String, value: String) -> usize {
        let node = Node {
            key,
            value,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.unlink(idx);
        let key = std::mem::take(&mut self.nodes[idx].key);
        self.nodes[idx].value.clear();
        self.index.remove(&key);
        self.free.push(idx);
    }
}

/// Size statistics of an [`LruCache`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LruStats {
    pub size: usize,
    pub capacity: usize,
    /// Fill level in percent
    pub usage: f64,
}

/// Thread-safe bounded string map with least-recently-used replacement
#[derive(Debug)]
pub struct LruCache {
    inner: Mutex<LruInner>,
    capacity: usize,
}

impl LruCache {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        inner.promote(idx);
        Some(inner.nodes[idx].value.clone())
    }

    /// Insert or update; returns true when a new key was added
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.index.get(&key).copied() {
            inner.nodes[idx].value = value;
            inner.promote(idx);
            return false;
        }

        let idx = inner.allocate(key.clone(), value);
        inner.index.insert(key, idx);
        inner.push_front(idx);

        if inner.index.len() > self.capacity {
            if let Some(tail) = inner.tail {
                inner.release(tail);
            }
        }
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.index.get(key).copied() {
            Some(idx) => {
                inner.release(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        *self.inner.lock() = LruInner::default();
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            keys.push(inner.nodes[idx].key.clone());
            cursor = inner.nodes[idx].next;
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> LruStats {
        let size = self.len();
        LruStats {
            size,
            capacity: self.capacity,
            usage: size as f64 / self.capacity as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recent() {
        let lru = LruCache::new(2);
        assert!(lru.set("a", "1"));
        assert!(lru.set("b", "2"));
        assert_eq!(lru.get("a").as_deref(), Some("1"));

        assert!(lru.set("c", "3"));
        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.keys(), vec!["c", "a"]);
    }

    #[test]
    fn test_update_promotes() {
        let lru = LruCache::new(2);
        lru.set("a", "1");
        lru.set("b", "2");
        assert!(!lru.set("a", "10"));
        lru.set("c", "3");

        assert_eq!(lru.get("a").as_deref(), Some("10"));
        assert!(lru.get("b").is_none());
    }

    #[test]
    fn test_delete_and_slot_reuse() {
        let lru = LruCache::new(3);
        lru.set("a", "1");
        lru.set("b", "2");
        lru.set("c", "3");

        assert!(lru.delete("b"));
        assert!(!lru.delete("b"));
        assert_eq!(lru.keys(), vec!["c", "a"]);

        lru.set("d", "4");
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.keys(), vec!["d", "c", "a"]);
        assert_eq!(lru.inner.lock().nodes.len(), 3);
    }

    #[test]
    fn test_delete_head_and_tail() {
        let lru = LruCache::new(3);
        lru.set("a", "1");
        lru.set("b", "2");
        lru.set("c", "3");

        assert!(lru.delete("c"));
        assert!(lru.delete("a"));
        assert_eq!(lru.keys(), vec!["b"]);
        lru.set("e", "5");
        assert_eq!(lru.keys(), vec!["e", "b"]);
    }

    #[test]
    fn test_clear_and_stats() {
        let lru = LruCache::new(4);
        lru.set("a", "1");
        assert_eq!(lru.stats().usage, 25.0);

        lru.clear();
        assert!(lru.is_empty());
        assert!(lru.keys().is_empty());
        assert_eq!(lru.capacity(), 4);
    }
}
