//! CLI argument parsing for drivesync

use crate::config::Config;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// drivesync - Block-level delta uploads to a remote drive
#[derive(Parser, Debug)]
#[command(name = "drivesync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a file, as a delta against a stored version when possible
    Upload(UploadArgs),

    /// Generate a signature file
    Sign(SignArgs),

    /// Compute the delta between two local files
    Diff(DiffArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the upload command
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Id of the stored version to diff against [default: a file with the
    /// same name in the destination folder]
    #[arg(short, long, conflicts_with = "new")]
    pub existing: Option<String>,

    /// Upload as a new file without looking for a stored version
    #[arg(long)]
    pub new: bool,

    /// Destination folder id
    #[arg(short, long)]
    pub folder: Option<String>,

    /// Drive service base URL [default: from config]
    #[arg(long)]
    pub server: Option<String>,

    /// Bearer token for the drive service
    #[arg(long, env = "DRIVESYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Minimum savings percentage for a delta upload
    #[arg(long, value_parser = clap::value_parser!(f64))]
    pub threshold: Option<f64>,

    /// Block size for delta signatures (e.g. 4096, 8K)
    #[arg(long)]
    pub block_size: Option<String>,

    /// Transport chunk size for full uploads (e.g. 1M)
    #[arg(long)]
    pub chunk_size: Option<String>,

    /// Chunks in flight at once [0 = CPU count]
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl UploadArgs {
    /// Merge CLI args over `base` and validate the result
    pub fn to_config(&self, base: Config) -> Result<Config> {
        let mut config = base;

        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(threshold) = self.threshold {
            config.savings_threshold_percent = threshold;
        }
        if let Some(size) = &self.block_size {
            config.block_size = Config::parse_size(size)? as usize;
        }
        if let Some(size) = &self.chunk_size {
            config.chunk_size = Config::parse_size(size)? as usize;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if self.no_progress {
            config.progress = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the sign command
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// File to generate signature for
    pub file: PathBuf,

    /// Output signature file path (default: <file>.dsig)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Block size (e.g. 4096, 8K) [default: from config]
    #[arg(long)]
    pub block_size: Option<String>,
}

/// Arguments for the diff command
#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// Stored version
    pub old: PathBuf,

    /// New version
    pub new: PathBuf,

    /// Block size (e.g. 4096, 8K) [default: from config]
    #[arg(long)]
    pub block_size: Option<String>,

    /// Minimum savings percentage for a delta upload [default: from config]
    #[arg(long)]
    pub threshold: Option<f64>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show the configuration file path
    #[arg(long)]
    pub path: bool,

    /// Create default configuration file
    #[arg(long)]
    pub init: bool,
}

/// Resolve an optional size flag against a configured default
pub fn size_or(flag: Option<&str>, default: usize) -> Result<usize> {
    match flag {
        Some(s) => Ok(Config::parse_size(s)? as usize),
        None => Ok(default),
    }
}
