//! Configuration management for tidecache
//!
//! Settings are read from TOML, then selected values may be overridden from
//! the environment:
//! - `TIDECACHE_MAX_MEMORY`
//! - `TIDECACHE_EVICTION_POLICY`
//! - `TIDECACHE_LOG_LEVEL`

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::cache::EvictionPolicy;
use crate::monitoring::LoggingConfig;

pub const ENV_MAX_MEMORY: &str = "TIDECACHE_MAX_MEMORY";
pub const ENV_EVICTION_POLICY: &str = "TIDECACHE_EVICTION_POLICY";
pub const ENV_LOG_LEVEL: &str = "TIDECACHE_LOG_LEVEL";

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TideConfig {
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Cache engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory limit such as "512mb"; "0" means unlimited
    pub max_memory: String,
    pub eviction_policy: EvictionPolicy,
    /// Warning threshold in percent of `max_memory`
    pub pressure_warning: u8,
    /// Critical threshold in percent of `max_memory`
    pub pressure_critical: u8,
    /// Keys inspected per eviction decision
    pub eviction_sample_size: usize,
    /// Period of the background eviction check
    pub eviction_interval_ms: u64,
    /// Period of the expiry wheel poll
    pub wheel_tick_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory: "0".to_string(),
            eviction_policy: EvictionPolicy::AllKeysLru,
            pressure_warning: 70,
            pressure_critical: 85,
            eviction_sample_size: 5,
            eviction_interval_ms: 100,
            wheel_tick_ms: 100,
        }
    }
}

impl CacheConfig {
    /// Memory limit in bytes, 0 when unlimited
    pub fn max_memory_bytes(&self) -> Result<i64> {
        parse_memory_size(&self.max_memory)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn wheel_tick(&self) -> Duration {
        Duration::from_millis(self.wheel_tick_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.max_memory_bytes()?;

        if self.pressure_warning == 0 || self.pressure_warning > 100 {
            return Err(anyhow!("Pressure warning must be between 1 and 100"));
        }
        if self.pressure_critical == 0 || self.pressure_critical > 100 {
            return Err(anyhow!("Pressure critical must be between 1 and 100"));
        }
        if self.pressure_warning >= self.pressure_critical {
            return Err(anyhow!(
                "Pressure warning ({}) must be below critical ({})",
                self.pressure_warning,
                self.pressure_critical
            ));
        }
        if self.eviction_sample_size == 0 {
            return Err(anyhow!("Eviction sample size cannot be 0"));
        }
        if self.eviction_interval_ms == 0 {
            return Err(anyhow!("Eviction interval cannot be 0"));
        }
        if self.wheel_tick_ms == 0 {
            return Err(anyhow!("Wheel tick interval cannot be 0"));
        }
        Ok(())
    }
}

impl TideConfig {
    /// Read, override from the environment, and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup(ENV_MAX_MEMORY) {
            self.cache.max_memory = v;
        }
        if let Some(v) = lookup(ENV_EVICTION_POLICY) {
            match v.parse::<EvictionPolicy>() {
                Ok(policy) => self.cache.eviction_policy = policy,
                Err(e) => warn!(value = %v, error = %e, "Ignoring eviction policy override"),
            }
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if !self.logging.is_valid_level() {
            return Err(anyhow!("Unknown log level: {}", self.logging.level));
        }
        Ok(())
    }
}

/// Parse a size such as `"64mb"`, `"2GiB"` or `"1024"` into bytes
///
/// Units are 1024-based; `""` and `"0"` mean unlimited.
pub fn parse_memory_size(input: &str) -> Result<i64> {
    const UNITS: [(&str, i64); 9] = [
        ("tib", 1 << 40),
        ("gib", 1 << 30),
        ("mib", 1 << 20),
        ("kib", 1 << 10),
        ("tb", 1 << 40),
        ("gb", 1 << 30),
        ("mb", 1 << 20),
        ("kb", 1 << 10),
        ("b", 1),
    ];

    let s = input.trim().to_lowercase();
    if s.is_empty() || s == "0" {
        return Ok(0);
    }

    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|rest| (rest.trim(), *mult)))
        .unwrap_or((s.as_str(), 1));

    let value: i64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid memory size: {}", input))?;
    if value < 0 {
        return Err(anyhow!("invalid memory size: {}", input));
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("memory size overflows: {}", input))
}
