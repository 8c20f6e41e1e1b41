//! End-to-end tests for the cache facade, namespaces and configuration files

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use tidecache_core::{
    Cache, CacheConfig, CacheError, DataType, EvictionPolicy, ManualClock, NamespaceManager,
    SetOptions, TideConfig, Ttl, Value, DEFAULT_NAMESPACE,
};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_cache_from_config_file() {
    let file = write_config(
        r#"
        [cache]
        max_memory = "4kb"
        eviction_policy = "allkeys-lfu"
        eviction_sample_size = 8

        [logging]
        level = "warn"
        json_format = true
        "#,
    );

    let config = TideConfig::load(file.path()).unwrap();
    assert_eq!(config.cache.max_memory_bytes().unwrap(), 4096);
    assert_eq!(config.cache.eviction_policy, EvictionPolicy::AllKeysLfu);
    assert!(config.logging.json_format);

    let cache = Cache::new(config.cache).unwrap();
    assert_eq!(cache.memory().max(), 4096);
    assert_eq!(cache.eviction().policy(), EvictionPolicy::AllKeysLfu);
    assert_eq!(cache.eviction().sample_size(), 8);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let file = write_config(
        r#"
        [cache]
        pressure_warning = 90
        pressure_critical = 80
        "#,
    );
    let err = TideConfig::load(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("must be below critical"));

    let file = write_config("[cache\nmax_memory = ");
    let err = TideConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));

    let missing = std::env::temp_dir().join("tidecache-does-not-exist.toml");
    let err = TideConfig::load(&missing).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_typed_values_through_cache() {
    let cache = Cache::new(CacheConfig::default()).unwrap();

    let mut hash = tidecache_core::HashValue::new();
    hash.set("name", "tide");
    cache.set("h", Value::Hash(hash), SetOptions::new()).unwrap();
    cache.set("s", Value::string("plain"), SetOptions::new()).unwrap();

    assert_eq!(cache.data_type("h"), Some(DataType::Hash));
    assert_eq!(cache.data_type("s"), Some(DataType::String));
    assert_eq!(cache.data_type("nope"), None);

    let entry = cache.get("h").unwrap();
    assert_eq!(entry.value().as_hash().unwrap().get("name"), Some(&b"tide"[..]));
    assert!(entry.value().as_list().is_none());
}

#[test]
fn test_lazy_and_active_expiry_agree() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Cache::with_clock(CacheConfig::default(), clock.clone()).unwrap();

    for i in 0..10 {
        let opts = SetOptions::new().ttl(Duration::from_secs(5));
        cache.set(&format!("lazy:{}", i), Value::string("v"), opts.clone()).unwrap();
        cache.set(&format!("active:{}", i), Value::string("v"), opts).unwrap();
    }
    assert_eq!(cache.ttl("lazy:0"), Ttl::Remaining(Duration::from_secs(5)));

    clock.advance(Duration::from_secs(6));
    for i in 0..10 {
        assert!(cache.get(&format!("lazy:{}", i)).is_none());
    }
    assert_eq!(cache.expire_due(), 10);
    assert!(cache.is_empty());
    assert_eq!(cache.memory().usage(), 0);
    assert!(cache.wheel().is_empty());
}

#[test]
fn test_keep_ttl_keeps_wheel_deadline() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Cache::with_clock(CacheConfig::default(), clock.clone()).unwrap();

    cache
        .set("k", Value::string("v1"), SetOptions::new().ttl(Duration::from_secs(10)))
        .unwrap();
    clock.advance(Duration::from_secs(4));
    cache
        .set("k", Value::string("v2"), SetOptions::new().keep_ttl())
        .unwrap();
    assert!(cache.wheel().contains("k"));
    assert_eq!(cache.ttl("k"), Ttl::Remaining(Duration::from_secs(6)));

    clock.advance(Duration::from_secs(7));
    assert_eq!(cache.expire_due(), 1);
    assert!(!cache.exists("k"));
}

#[test]
fn test_background_loops_expire_and_evict() {
    let config = CacheConfig {
        max_memory: "4kb".to_string(),
        wheel_tick_ms: 10,
        eviction_interval_ms: 10,
        ..Default::default()
    };
    let cache = Cache::new(config).unwrap();
    let evicted = Arc::new(AtomicUsize::new(0));
    let counter = evicted.clone();
    cache.on_evict(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..60 {
        cache
            .set(&format!("key:{}", i), Value::string(vec![1u8; 100]), SetOptions::new())
            .unwrap();
    }
    cache.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    cache.stop();

    assert!(evicted.load(Ordering::SeqCst) > 0);
    assert!(cache.memory().usage() < 4096);

    let stats = cache.stats();
    assert_eq!(stats.eviction.evicted as usize, evicted.load(Ordering::SeqCst));
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["keys"], stats.keys);
    assert!(json["pressure"].is_string());
}

#[test]
fn test_noeviction_surfaces_memory_limit() {
    let config = CacheConfig {
        max_memory: "1kb".to_string(),
        eviction_policy: EvictionPolicy::NoEviction,
        ..Default::default()
    };
    let cache = Cache::new(config).unwrap();

    let results: Vec<_> = (0..20)
        .map(|i| cache.set(&format!("k{}", i), Value::string(vec![0u8; 64]), SetOptions::new()))
        .collect();
    assert!(results.iter().any(|r| r.is_ok()));
    assert_eq!(results.last(), Some(&Err(CacheError::MemoryLimit)));

    // Deleting frees room again
    let first = cache.keys().into_iter().next().unwrap();
    assert!(cache.delete(&first));
    assert!(cache.set("again", Value::string(vec![0u8; 64]), SetOptions::new()).is_ok());
}

#[test]
fn test_namespaces_are_isolated() {
    let manager = NamespaceManager::new();
    let orders = manager.get_or_create("orders");
    orders.store.set("id:1", Value::string("a"), SetOptions::new()).unwrap();
    manager
        .default_namespace()
        .store
        .set("id:1", Value::string("b"), SetOptions::new())
        .unwrap();

    assert_eq!(manager.list(), vec![DEFAULT_NAMESPACE.to_string(), "orders".to_string()]);
    assert_eq!(manager.flush("orders").unwrap(), 1);
    assert!(manager.default_namespace().store.exists("id:1"));
    assert!(manager.drop_namespace(DEFAULT_NAMESPACE).is_err());
    assert!(manager.drop_namespace("orders").is_ok());
}
