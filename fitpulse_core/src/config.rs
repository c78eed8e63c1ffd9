//! Configuration file support for FitPulse.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/fitpulse/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Operation queue tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum operations executing at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum delay between consecutive dispatches, in milliseconds
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

impl QueueConfig {
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

/// Retry executor and state-manager tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per remote operation before surfacing the last error
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Per-operation-type retry budget tracked by the state manager
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

/// Reconciliation cadence and paging
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Hours between automatic full reconciliation passes
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Records fetched per page while recomputing ground truth
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            page_size: default_page_size(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.interval_hours as i64)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").expect("HOME environment variable not set");
        PathBuf::from(home).join(".local/share")
    });
    base.join("fitpulse")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_rate_limit_delay_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_interval_hours() -> u64 {
    24
}

fn default_page_size() -> usize {
    100
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").expect("HOME environment variable not set");
            PathBuf::from(home).join(".config")
        });
        base.join("fitpulse").join("config.toml")
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent == 0 {
            return Err(Error::Config("queue.max_concurrent must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
        }
        if self.reconcile.page_size == 0 {
            return Err(Error::Config("reconcile.page_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
