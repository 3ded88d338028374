//! Delta plans: reconstruction instructions plus novel block payloads

pub mod apply;
pub mod compute;
pub mod gate;

pub use apply::apply_delta;
pub use compute::{compute_delta, compute_delta_from_path};
pub use gate::{is_worthwhile, DEFAULT_SAVINGS_THRESHOLD};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One reconstruction step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Instruction {
    /// Reuse a block of the stored version
    Copy {
        #[serde(rename = "sourceIndex")]
        source_index: usize,
        #[serde(rename = "destIndex")]
        dest_index: usize,
        length: usize,
    },

    /// Place a newly transmitted block
    Insert {
        /// Position in [`DeltaPlan::novel_blocks`]
        #[serde(rename = "blockIndex")]
        block_index: usize,
        #[serde(rename = "destIndex")]
        dest_index: usize,
        length: usize,
    },
}

impl Instruction {
    /// Index of the block this step produces in the new file
    pub fn dest_index(&self) -> usize {
        match self {
            Instruction::Copy { dest_index, .. } | Instruction::Insert { dest_index, .. } => *dest_index,
        }
    }

    /// Number of bytes this step produces
    pub fn length(&self) -> usize {
        match self {
            Instruction::Copy { length, .. } | Instruction::Insert { length, .. } => *length,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Instruction::Copy { .. })
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Instruction::Insert { .. })
    }
}

/// A block payload that the stored version does not contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelBlock {
    /// Position of the block in the new file
    pub dest_index: usize,
    pub data: Bytes,
}

/// Block and byte accounting for one delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaStats {
    pub total_blocks: usize,
    pub novel_blocks: usize,
    pub reused_blocks: usize,
    /// reused_blocks / total_blocks * 100, or 100 for an empty file
    pub savings_percent: f64,
    /// Size of the new file in bytes
    pub original_size: u64,
    /// Bytes carried by novel blocks
    pub delta_size: u64,
}

impl DeltaStats {
    /// Derive stats from block counts and byte sizes
    pub fn new(total_blocks: usize, novel_blocks: usize, original_size: u64, delta_size: u64) -> Self {
        let reused_blocks = total_blocks - novel_blocks;
        let savings_percent = if total_blocks == 0 {
            100.0
        } else {
            reused_blocks as f64 / total_blocks as f64 * 100.0
        };

        Self {
            total_blocks,
            novel_blocks,
            reused_blocks,
            savings_percent,
            original_size,
            delta_size,
        }
    }

    /// Stats for a whole-file transfer, where nothing is reused
    pub fn full_transfer(total_blocks: usize, original_size: u64) -> Self {
        Self {
            total_blocks,
            novel_blocks: total_blocks,
            reused_blocks: 0,
            savings_percent: 0.0,
            original_size,
            delta_size: original_size,
        }
    }
}

/// Output of comparing a local signature against a stored one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaPlan {
    /// Reconstruction steps in ascending `dest_index` order
    pub instructions: Vec<Instruction>,
    /// Payloads referenced by `Insert::block_index`
    pub novel_blocks: Vec<NovelBlock>,
    pub stats: DeltaStats,
}

impl DeltaPlan {
    /// True when there is nothing to reconstruct (zero-length file)
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Total bytes carried by novel blocks
    pub fn novel_bytes(&self) -> u64 {
        self.novel_blocks.iter().map(|b| b.data.len() as u64).sum()
    }

    /// Size of the file this plan reconstructs
    pub fn target_size(&self) -> u64 {
        self.instructions.iter().map(|i| i.length() as u64).sum()
    }
}
