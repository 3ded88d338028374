//! Configuration management for drivesync

use crate::delta::DEFAULT_SAVINGS_THRESHOLD;
use crate::error::{Error, Result};
use crate::signature::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default transport chunk size for full uploads (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of chunks in flight per session (0 = auto)
pub const DEFAULT_JOBS: usize = 1;

/// Default drive service endpoint
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/api";

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ==================== Delta Options ====================

    /// Block size for signatures and delta matching (bytes)
    pub block_size: usize,

    /// Minimum percentage of reused blocks for a delta to be sent
    pub savings_threshold_percent: f64,

    // ==================== Transfer Options ====================

    /// Transport chunk size for full uploads (bytes)
    pub chunk_size: usize,

    /// Concurrent chunk transmissions within one session (0 = auto-detect CPU count)
    pub jobs: usize,

    /// Base URL of the drive service
    pub server_url: String,

    /// Show progress bars
    pub progress: bool,

    // ==================== Retry ====================

    /// Maximum fresh attempts after a retryable failure
    pub max_retries: u32,

    /// Retry delay base in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            savings_threshold_percent: DEFAULT_SAVINGS_THRESHOLD,

            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: DEFAULT_JOBS,
            server_url: DEFAULT_SERVER_URL.to_string(),
            progress: true,

            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("creating {}: {}", parent.display(), e)))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("serializing config: {}", e)))?;
        std::fs::write(path, contents)
            .map_err(|e| Error::config(format!("writing {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("drivesync").join("config.toml"))
            .ok_or_else(|| Error::config("could not determine config directory"))
    }

    /// Reject values no upload could run with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::config("block_size must be greater than zero"));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::config(format!(
                "block_size must be at most {} bytes, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.savings_threshold_percent) {
            return Err(Error::config(format!(
                "savings_threshold_percent must be within 0..=100, got {}",
                self.savings_threshold_percent
            )));
        }
        Ok(())
    }

    /// Get the effective number of jobs (resolves 0 to CPU count)
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    /// Parse a size string like "100", "100K", "4M", "1G" into bytes
    pub fn parse_size(s: &str) -> Result<u64> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return Ok(0);
        }

        let (num_part, suffix) = if let Some(n) = s.strip_suffix("KB").or_else(|| s.strip_suffix('K')) {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix("MB").or_else(|| s.strip_suffix('M')) {
            (n, 1024u64 * 1024)
        } else if let Some(n) = s.strip_suffix("GB").or_else(|| s.strip_suffix('G')) {
            (n, 1024u64 * 1024 * 1024)
        } else {
            (s.as_str(), 1u64)
        };

        let num: u64 = num_part
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid size value: {}", s)))?;

        num.checked_mul(suffix)
            .ok_or_else(|| Error::config(format!("size value too large: {}", s)))
    }
}
