//! drivesync - Block-level delta uploads to a remote drive
//!
//! This library fingerprints files in fixed-size blocks, diffs them against
//! the signature of a stored version and uploads only the changed blocks,
//! falling back to a chunked full upload when a delta is not worthwhile.

pub mod cli;
pub mod config;
pub mod delta;
pub mod error;
pub mod format;
pub mod mmap;
pub mod progress;
pub mod remote;
pub mod retry;
pub mod signature;
pub mod types;
pub mod upload;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use types::*;
