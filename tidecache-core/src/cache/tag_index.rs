//! Tag → key index with a parent/child tag hierarchy
//!
//! Key sets are spread over 64 independently locked shards selected by the
//! FNV-1a hash of the tag. The hierarchy lives behind a separate mutex since it
//! changes rarely compared to key churn.

use crate::kv::fnv1a;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};

/// Number of tag shards (power of two)
pub const TAG_SHARDS: usize = 64;
const TAG_SHARD_MASK: u32 = (TAG_SHARDS - 1) as u32;

#[derive(Debug, Default)]
struct Hierarchy {
    children: HashMap<String, HashSet<String>>,
    parents: HashMap<String, String>,
}

#[derive(Debug)]
pub struct TagIndex {
    shards: Vec<RwLock<HashMap<String, HashSet<String>>>>,
    hierarchy: Mutex<Hierarchy>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self {
            shards: (0..TAG_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            hierarchy: Mutex::new(Hierarchy::default()),
        }
    }

    fn shard(&self, tag: &str) -> &RwLock<HashMap<String, HashSet<String>>> {
        &self.shards[(fnv1a(tag.as_bytes()) & TAG_SHARD_MASK) as usize]
    }

    /// Associate `key` with each tag
    pub fn add_tags<S: AsRef<str>>(&self, key: &str, tags: &[S]) {
        for tag in tags {
            let tag = tag.as_ref();
            self.shard(tag)
                .write()
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Drop the association between `key` and each tag, pruning empty tags
    pub fn remove_tags<S: AsRef<str>>(&self, key: &str, tags: &[S]) {
        for tag in tags {
            let tag = tag.as_ref();
            let mut shard = self.shard(tag).write();
            if let Some(keys) = shard.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    shard.remove(tag);
                }
            }
        }
    }

    /// Remove `key` from the index
    ///
    /// With an empty tag list every shard is scanned.
    pub fn remove_key<S: AsRef<str>>(&self, key: &str, tags: &[S]) {
        if !tags.is_empty() {
            self.remove_tags(key, tags);
            return;
        }
        for shard in &self.shards {
            shard.write().retain(|_, keys| {
                keys.remove(key);
                !keys.is_empty()
            });
        }
    }

    /// Keys currently carrying `tag`
    pub fn get_keys(&self, tag: &str) -> Vec<String> {
        self.shard(tag)
            .read()
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.shard(tag).read().get(tag).map_or(0, HashSet::len)
    }

    /// All tags with at least one key
    pub fn tags(&self) -> Vec<String> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Atomically read and clear the key set of `tag`
    pub fn invalidate(&self, tag: &str) -> Vec<String> {
        self.shard(tag)
            .write()
            .remove(tag)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default()
    }

    /// Add `child` under `parent`
    ///
    /// A tag may sit under several parents and is reached by a cascade from
    /// any of them. [`get_parent`](Self::get_parent) reports the most recent link.
    pub fn link(&self, parent: &str, child: &str) {
        let mut h = self.hierarchy.lock();
        h.parents.insert(child.to_string(), parent.to_string());
        h.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    pub fn unlink(&self, parent: &str, child: &str) {
        let mut h = self.hierarchy.lock();
        detach(&mut h.children, parent, child);
        if h.parents.get(child).map(String::as_str) == Some(parent) {
            h.parents.remove(child);
        }
    }

    pub fn get_children(&self, tag: &str) -> Vec<String> {
        self.hierarchy
            .lock()
            .children
            .get(tag)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_parent(&self, tag: &str) -> Option<String> {
        self.hierarchy.lock().parents.get(tag).cloned()
    }

    /// Transitive children of `tag`, excluding `tag` itself
    pub fn get_all_descendants(&self, tag: &str) -> Vec<String> {
        let h = self.hierarchy.lock();
        let mut seen = HashSet::new();
        seen.insert(tag.to_string());
        let mut stack = vec![tag.to_string()];
        let mut out = Vec::new();

        while let Some(current) = stack.pop() {
            let Some(children) = h.children.get(&current) else {
                continue;
            };
            for child in children {
                if seen.insert(child.clone()) {
                    out.push(child.clone());
                    stack.push(child.clone());
                }
            }
        }
        out
    }

    /// Invalidate `tag` and all of its descendants
    ///
    /// The result maps each tag to the keys it held; a key tagged with several
    /// of those tags appears under each of them.
    pub fn invalidate_cascade(&self, tag: &str) -> HashMap<String, Vec<String>> {
        let mut result = HashMap::new();
        result.insert(tag.to_string(), self.invalidate(tag));
        for descendant in self.get_all_descendants(tag) {
            let keys = self.invalidate(&descendant);
            result.insert(descendant, keys);
        }
        result
    }

    /// Drop every key set; the hierarchy is kept
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn detach(children: &mut HashMap<String, HashSet<String>>, parent: &str, child: &str) {
    if let Some(set) = children.get_mut(parent) {
        set.remove(child);
        if set.is_empty() {
            children.remove(parent);
        }
    }
}
