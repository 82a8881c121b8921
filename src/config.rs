use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// On-disk configuration. Every field has a default, so an absent or empty
/// file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub default_chunk_size: u64,
    pub chunk_delay_ms: u64,
    pub max_concurrent_chunks: usize,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Shared by every caller.
    pub global_per_minute: u32,
    /// Per session id.
    pub session_per_minute: u32,
    pub burst_size: u32,
    /// How often idle per-session buckets are dropped.
    pub cleanup_interval_secs: u64,
}

/// The subset of [`Config`] the job engine runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_chunk_size: u64,
    /// Delay between consecutive chunks of one job. The first chunk runs immediately.
    pub chunk_delay: Duration,
    pub max_concurrent_chunks: usize,
    pub limiter_cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: data_dir().join("jobs.db"),
            log_file: None,
            default_chunk_size: 3,
            chunk_delay_ms: 500,
            max_concurrent_chunks: 4,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            global_per_minute: 120,
            session_per_minute: 20,
            burst_size: 5,
            cleanup_interval_secs: 60,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine()
    }
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing file at the default location yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let config: Config = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.clone(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Config::default(),
            Err(e) => return Err(ConfigError::Read(path, e)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_chunk_size == 0 {
            return Err(ConfigError::Invalid("default_chunk_size must be at least 1".into()));
        }
        if self.chunk_delay_ms == 0 {
            return Err(ConfigError::Invalid("chunk_delay_ms must be at least 1".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(ConfigError::Invalid("max_concurrent_chunks must be at least 1".into()));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.global_per_minute == 0
                || self.rate_limit.session_per_minute == 0
                || self.rate_limit.burst_size == 0)
        {
            return Err(ConfigError::Invalid("rate limit quotas must be positive".into()));
        }
        if self.rate_limit.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid("rate_limit.cleanup_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            default_chunk_size: self.default_chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            max_concurrent_chunks: self.max_concurrent_chunks,
            limiter_cleanup_interval: Duration::from_secs(self.rate_limit.cleanup_interval_secs),
        }
    }
}

/// `<config_dir>/cascade-jobs/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cascade-jobs")
        .join("config.toml")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cascade-jobs")
}
