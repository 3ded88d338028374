//! Core domain types for drivesync

use crate::config::{Config, DEFAULT_CHUNK_SIZE};
use crate::delta::{DeltaStats, DEFAULT_SAVINGS_THRESHOLD};
use crate::signature::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the content of an upload reached the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Every byte sent as transport chunks
    Full,

    /// Reconstruction instructions plus novel blocks only
    Delta,
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Full => write!(f, "full"),
            UploadMode::Delta => write!(f, "delta"),
        }
    }
}

/// Per-call upload parameters
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    /// Block size for the delta signature
    pub block_size: usize,

    /// Minimum savings percentage for the delta path
    pub savings_threshold_percent: f64,

    /// Transport chunk size for full uploads
    pub chunk_size: usize,

    /// Chunks in flight at once within a session
    pub jobs: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            savings_threshold_percent: DEFAULT_SAVINGS_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: 1,
        }
    }
}

impl From<&Config> for UploadOptions {
    fn from(config: &Config) -> Self {
        Self {
            block_size: config.block_size,
            savings_threshold_percent: config.savings_threshold_percent,
            chunk_size: config.chunk_size,
            jobs: config.effective_jobs(),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Identity of the stored file
    pub file_id: String,

    /// Mode the committed session used
    pub mode: UploadMode,

    /// Block accounting (a full upload reuses nothing)
    pub stats: DeltaStats,

    /// Payload bytes acknowledged by the remote store
    pub bytes_sent: u64,
}

impl UploadOutcome {
    /// Bytes that did not have to be sent
    pub fn bytes_saved(&self) -> u64 {
        self.stats.original_size.saturating_sub(self.bytes_sent)
    }
}
