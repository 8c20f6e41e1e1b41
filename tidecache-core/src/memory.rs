//! Global memory accounting and pressure levels
//!
//! The tracker holds a single running total that the store adjusts with every
//! insert, overwrite, delete and flush. All operations are lock-free.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Usage fraction at which allocation is refused and eviction becomes aggressive
pub const EMERGENCY_PCT: f64 = 0.95;

/// Memory pressure level, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal = 0,
    Warning = 1,
    Critical = 2,
    Emergency = 3,
}

impl PressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
            PressureLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate memory usage against a configured maximum
#[derive(Debug)]
pub struct MemoryTracker {
    max_memory: i64,
    current_usage: AtomicI64,
    warning_pct: f64,
    critical_pct: f64,
}

impl MemoryTracker {
    /// Create a tracker; `max_memory == 0` means unlimited.
    /// Thresholds are whole percentages.
    pub fn new(max_memory: i64, warning_pct: u8, critical_pct: u8) -> Self {
        Self {
            max_memory: max_memory.max(0),
            current_usage: AtomicI64::new(0),
            warning_pct: f64::from(warning_pct) / 100.0,
            critical_pct: f64::from(critical_pct) / 100.0,
        }
    }

    /// Tracker without a limit
    pub fn unlimited() -> Self {
        Self::new(0, 70, 85)
    }

    pub fn add(&self, bytes: i64) {
        self.current_usage.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub(&self, bytes: i64) {
        self.current_usage.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn usage(&self) -> i64 {
        self.current_usage.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> i64 {
        self.max_memory
    }

    pub fn is_limited(&self) -> bool {
        self.max_memory > 0
    }

    pub fn critical_fraction(&self) -> f64 {
        self.critical_pct
    }

    fn fraction(&self, usage: i64) -> f64 {
        usage as f64 / self.max_memory as f64
    }

    pub fn pressure(&self) -> PressureLevel {
        if !self.is_limited() {
            return PressureLevel::Normal;
        }
        let pct = self.fraction(self.usage());
        if pct >= EMERGENCY_PCT {
            PressureLevel::Emergency
        } else if pct >= self.critical_pct {
            PressureLevel::Critical
        } else if pct >= self.warning_pct {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    /// Whether `bytes` more can be stored without reaching the emergency threshold
    pub fn can_allocate(&self, bytes: i64) -> bool {
        if !self.is_limited() {
            return true;
        }
        self.fraction(self.usage() + bytes) < EMERGENCY_PCT
    }

    /// Usage as a percentage of the maximum, 0 when unlimited
    pub fn pressure_percent(&self) -> f64 {
        if !self.is_limited() {
            return 0.0;
        }
        self.fraction(self.usage()) * 100.0
    }

    pub fn reset(&self) {
        self.current_usage.store(0, Ordering::Relaxed);
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}
