//! Monitoring for tidecache
//!
//! - Prometheus counters and gauges per cache instance
//! - Structured logging with tracing

pub mod logging;
pub mod metrics;

pub use logging::*;
pub use metrics::*;
