//! Named, independent stores

use super::Store;
use crate::clock::{system_clock, SharedClock};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Name of the namespace that always exists
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    pub store: Store,
    pub created_at: DateTime<Utc>,
}

impl Namespace {
    fn new(name: &str, clock: SharedClock) -> Self {
        Self {
            name: name.to_string(),
            store: Store::with_clock(clock),
            created_at: Utc::now(),
        }
    }
}

/// Namespace statistics
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceStats {
    pub name: String,
    pub keys: usize,
    pub memory: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NamespaceManager {
    namespaces: DashMap<String, Arc<Namespace>>,
    default_ns: Arc<Namespace>,
    clock: SharedClock,
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        let default_ns = Arc::new(Namespace::new(DEFAULT_NAMESPACE, clock.clone()));
        let namespaces = DashMap::new();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), default_ns.clone());
        Self {
            namespaces,
            default_ns,
            clock,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).map(|ns| ns.value().clone())
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Namespace> {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(namespace = %name, "Creating namespace");
                Arc::new(Namespace::new(name, self.clock.clone()))
            })
            .value()
            .clone()
    }

    /// Remove a namespace; the default namespace cannot be dropped
    pub fn drop_namespace(&self, name: &str) -> Result<()> {
        if name == DEFAULT_NAMESPACE {
            return Err(CacheError::Namespace(
                "cannot delete default namespace".to_string(),
            ));
        }
        match self.namespaces.remove(name) {
            Some(_) => Ok(()),
            None => Err(CacheError::Namespace(format!("namespace not found: {}", name))),
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn default_namespace(&self) -> &Arc<Namespace> {
        &self.default_ns
    }

    pub fn flush(&self, name: &str) -> Result<usize> {
        self.get(name)
            .map(|ns| ns.store.flush())
            .ok_or_else(|| CacheError::Namespace(format!("namespace not found: {}", name)))
    }

    pub fn flush_all(&self) {
        for ns in self.namespaces.iter() {
            ns.store.flush();
        }
    }

    pub fn stats(&self, name: &str) -> Result<NamespaceStats> {
        let ns = self
            .get(name)
            .ok_or_else(|| CacheError::Namespace(format!("namespace not found: {}", name)))?;
        Ok(NamespaceStats {
            name: ns.name.clone(),
            keys: ns.store.key_count(),
            memory: ns.store.mem_usage(),
            created_at: ns.created_at,
        })
    }
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::data_structures::Value;
    use crate::kv::SetOptions;

    #[test]
    fn test_default_namespace_exists() {
        let manager = NamespaceManager::new();
        assert_eq!(manager.list(), vec!["default"]);
        assert!(manager.get("default").is_some());
        assert_eq!(manager.default_namespace().name, "default");
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let manager = NamespaceManager::new();
        let a = manager.get_or_create("a");
        let b = manager.get_or_create("b");

        a.store.set("k", Value::string("1"), SetOptions::new()).unwrap();
        assert!(a.store.exists("k"));
        assert!(!b.store.exists("k"));

        let again = manager.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(manager.list(), vec!["a", "b", "default"]);
    }

    #[test]
    fn test_drop_namespace() {
        let manager = NamespaceManager::new();
        manager.get_or_create("tmp");

        assert!(manager.drop_namespace("default").is_err());
        assert!(manager.drop_namespace("tmp").is_ok());
        assert!(manager.drop_namespace("tmp").is_err());
        assert!(manager.get("tmp").is_none());
    }

    #[test]
    fn test_flush_and_stats() {
        let manager = NamespaceManager::new();
        let ns = manager.get_or_create("sessions");
        ns.store.set("s1", Value::string("x"), SetOptions::new()).unwrap();
        manager
            .default_namespace()
            .store
            .set("d", Value::string("y"), SetOptions::new())
            .unwrap();

        let stats = manager.stats("sessions").unwrap();
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.memory, 64 + 1 + 24);

        assert_eq!(manager.flush("sessions").unwrap(), 1);
        assert!(manager.flush("missing").is_err());

        manager.flush_all();
        assert_eq!(manager.default_namespace().store.key_count(), 0);
    }
}
