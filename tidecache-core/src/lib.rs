//! tidecache core - in-memory cache engine
//!
//! This crate provides:
//! - A 256-way sharded key/value store with typed values, TTLs and tags
//! - Global memory accounting with pressure levels
//! - Sampled LRU/LFU/random eviction
//! - A hierarchical timing wheel for active expiry
//! - Hierarchical tag invalidation
//! - Namespaces, configuration, logging and Prometheus metrics

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod memory;
pub mod monitoring;

pub use cache::*;
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{parse_memory_size, CacheConfig, TideConfig};
pub use error::{CacheError, Result};
pub use kv::*;
pub use memory::*;
pub use monitoring::*;
