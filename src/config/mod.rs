//! Typed configuration.
//!
//! [`Config`] loads once at startup from environment variables and fails
//! fast on bad values. [`DispatcherConfig`] can also come from a TOML file.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pool::AdmissionPolicy;

/// Dispatcher and worker-pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Maximum captures running at once.
    pub max_concurrent: usize,
    /// What the dispatcher does when every worker is busy.
    pub admission: AdmissionPolicy,
    /// Wait for in-flight captures before `run()` returns.
    pub drain_on_stop: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            admission: AdmissionPolicy::Block,
            drain_on_stop: true,
        }
    }
}

impl DispatcherConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad dispatcher config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".to_string()));
        }
        if self.max_concurrent > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "max_concurrent must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = DispatcherConfig::default();

        let dispatcher = DispatcherConfig {
            max_concurrent: parsed_var("CAPQ_MAX_CONCURRENT")?.unwrap_or(defaults.max_concurrent),
            admission: parsed_var("CAPQ_ADMISSION")?.unwrap_or(defaults.admission),
            drain_on_stop: parsed_var("CAPQ_DRAIN_ON_STOP")?.unwrap_or(defaults.drain_on_stop),
        };
        dispatcher.validate()?;

        Ok(Self {
            dispatcher,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(None),
    }
}
