//! Cache layer for tidecache
//!
//! Redis-compatible value types, entries with TTL and access telemetry,
//! tag indexing, eviction and expiry.

pub mod background;
pub mod cache_layer;
pub mod data_structures;
pub mod entry;
pub mod eviction;
pub mod geo;
pub mod lru;
pub mod sorted_set;
pub mod stream;
pub mod tag_index;
pub mod timing_wheel;

pub use cache_layer::*;
pub use data_structures::*;
pub use entry::*;
pub use eviction::*;
pub use geo::*;
pub use lru::*;
pub use sorted_set::*;
pub use stream::*;
pub use tag_index::*;
pub use timing_wheel::*;
