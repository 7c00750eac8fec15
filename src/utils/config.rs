// src/utils/config.rs
//! Service configuration
//!
//! Values are layered: built-in defaults, then an optional config file
//! (`engine-pool.toml`, or the path in `ENGINE_POOL_CONFIG`), then
//! `ENGINE_POOL__*` environment variables, e.g. `ENGINE_POOL__POOL__MAX_SIZE=4`.

use crate::utils::errors::{PoolError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "engine-pool";

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "ENGINE_POOL_CONFIG";

/// Top-level configuration for the engine pool service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub pool: PoolConfig,
    pub observability: ObservabilityConfig,
}

/// Engine pool sizing and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of resident engines (default: 2)
    pub max_size: usize,

    /// Blocking load/unload workers (default: 2)
    pub executor_workers: usize,

    /// Deadline for a single engine load in seconds (default: 600)
    pub load_timeout_secs: u64,

    /// Deadline for a single health probe in milliseconds (default: 2000)
    pub health_timeout_ms: u64,

    /// Models loaded at startup by the service binary
    pub preload: Vec<String>,

    pub watchdog: WatchdogConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 2,
            executor_workers: 2,
            load_timeout_secs: 600,
            health_timeout_ms: 2000,
            preload: vec![],
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Validate sizes and intervals
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidCapacity(0));
        }
        if self.executor_workers == 0 {
            return Err(PoolError::Config("executor_workers must be at least 1".into()));
        }
        if self.load_timeout_secs == 0 {
            return Err(PoolError::Config("load_timeout_secs must be positive".into()));
        }
        if self.health_timeout_ms == 0 {
            return Err(PoolError::Config("health_timeout_ms must be positive".into()));
        }
        self.watchdog.validate()
    }
}

/// Background health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Start the watchdog on first successful load (default: true)
    pub enabled: bool,

    /// Seconds between health sweeps (default: 10)
    pub interval_secs: u64,

    /// Consecutive failed probes before an engine is restarted (default: 3)
    pub max_failures: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            max_failures: 3,
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(PoolError::Config("watchdog.interval_secs must be positive".into()));
        }
        if self.max_failures == 0 {
            return Err(PoolError::Config("watchdog.max_failures must be at least 1".into()));
        }
        Ok(())
    }
}

/// Logging and metrics export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => Self::build(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        }
    }

    /// Load configuration from an explicit file, still honouring env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: ServiceConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("ENGINE_POOL")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("pool.preload"),
            )
            .build()?
            .try_deserialize()?;

        config.pool.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.pool.max_size, 2);
        assert_eq!(config.pool.executor_workers, 2);
        assert_eq!(config.pool.watchdog.interval_secs, 10);
        assert_eq!(config.pool.watchdog.max_failures, 3);
        assert!(config.pool.watchdog.enabled);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.pool.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero_size = PoolConfig {
            max_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_size.validate(), Err(PoolError::InvalidCapacity(0))));

        let zero_workers = PoolConfig {
            executor_workers: 0,
            ..Default::default()
        };
        assert!(matches!(zero_workers.validate(), Err(PoolError::Config(_))));

        let zero_failures = PoolConfig {
            watchdog: WatchdogConfig {
                max_failures: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(zero_failures.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pool]
max_size = 4
health_timeout_ms = 500
preload = ["/models/dolphin-34b-awq"]

[pool.watchdog]
interval_secs = 30
max_failures = 5

[observability]
json_logs = true
"#
        )
        .unwrap();

        let config = ServiceConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.health_timeout(), Duration::from_millis(500));
        assert_eq!(config.pool.preload, vec!["/models/dolphin-34b-awq".to_string()]);
        assert_eq!(config.pool.watchdog.interval(), Duration::from_secs(30));
        assert_eq!(config.pool.watchdog.max_failures, 5);
        // Unset keys keep their defaults
        assert_eq!(config.pool.executor_workers, 2);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pool]\nmax_size = 0").unwrap();

        let result = ServiceConfig::load_from(file.path());
        assert!(matches!(result, Err(PoolError::InvalidCapacity(0))));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = ServiceConfig::load_from(Path::new("/nonexistent/engine-pool.toml"));
        assert!(matches!(result, Err(PoolError::Config(_))));
    }
}
