//! Structured logging with tracing
//!
//! Installs a global subscriber that writes either compact human-readable
//! lines or JSON records. `RUST_LOG` takes precedence over the configured
//! level when it is set.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,

    /// Emit JSON records instead of compact text
    pub json_format: bool,

    /// Include thread names in each record
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
            thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Parse the configured level, falling back to INFO
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" | "WARNING" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }

    pub fn is_valid_level(&self) -> bool {
        matches!(
            self.level.to_uppercase().as_str(),
            "ERROR" | "WARN" | "WARNING" | "INFO" | "DEBUG" | "TRACE"
        )
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.parse_level().as_str().to_lowercase()))
    }
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber has already been set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let subscriber = Registry::default().with(config.env_filter());

    let installed = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(config.thread_names);

        subscriber.with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(config.thread_names)
            .compact();

        subscriber.with(fmt_layer).try_init()
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;
    tracing::info!(level = %config.parse_level(), json = config.json_format, "Logging initialized");
    Ok(())
}
