//! Block fingerprints and whole-file signatures

pub mod file;
pub mod generate;

pub use file::{read_signature, read_signature_from_bytes, write_signature, write_signature_to_bytes};
pub use generate::{generate_signature, generate_signature_from_bytes, strong_hash, weak_hash};

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Magic bytes for .dsig files
pub const SIGNATURE_MAGIC: &[u8; 6] = b"DSSIG\x01";

/// Current signature format version
pub const SIGNATURE_VERSION: u8 = 1;

/// Default block size used for fingerprinting (4 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest block size accepted from configuration or a stored signature (64 MiB)
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// SHA-256 digest of a block; the authoritative equality key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrongHash(pub [u8; 32]);

impl StrongHash {
    /// Parse a 64-character hex digest
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| Error::protocol(format!("invalid strong hash {:?}: {}", s, e)))?;
        Ok(Self(out))
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrongHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for StrongHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StrongHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StrongHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Servers that compute the checksum in signed 32-bit arithmetic send values
/// with the top bit set as negative numbers; both encodings carry the same bits.
fn deserialize_weak_hash<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    let value = i64::deserialize(deserializer)?;
    if value < i64::from(i32::MIN) || value > i64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!("weak hash {} out of range", value)));
    }
    Ok(value as u32)
}

/// Identity of one block's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFingerprint {
    /// Block index (0-based)
    pub index: usize,

    /// Offset in the file
    pub offset: u64,

    /// Actual length of this block (may be less than block_size for the last block)
    pub length: usize,

    /// Adler-32 style checksum, only ever used as a pre-filter
    #[serde(deserialize_with = "deserialize_weak_hash")]
    pub weak_hash: u32,

    /// SHA-256 of the block bytes
    #[serde(rename = "hash")]
    pub strong_hash: StrongHash,
}

impl BlockFingerprint {
    /// Create a new block fingerprint
    pub fn new(index: usize, offset: u64, length: usize, weak_hash: u32, strong_hash: StrongHash) -> Self {
        Self {
            index,
            offset,
            length,
            weak_hash,
            strong_hash,
        }
    }

    /// Offset one past the last byte of this block
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Ordered fingerprints of every block in one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSignature {
    /// Block size used for chunking
    pub block_size: usize,

    /// Per-block fingerprints, in index order
    pub signatures: Vec<BlockFingerprint>,
}

impl FileSignature {
    /// Create a new empty signature
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            signatures: Vec::new(),
        }
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Total number of bytes covered by the signature
    pub fn file_size(&self) -> u64 {
        self.signatures.last().map(BlockFingerprint::end).unwrap_or(0)
    }

    /// Check that blocks are gap-free, in index order, and uniformly sized
    /// except for a possibly shorter final block.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::delta("signature block size is zero"));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::delta(format!(
                "signature block size {} exceeds the {} byte limit",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }

        let last = self.signatures.len().saturating_sub(1);
        let mut expected_offset = 0u64;

        for (i, block) in self.signatures.iter().enumerate() {
            if block.index != i {
                return Err(Error::delta(format!(
                    "block at position {} has index {}",
                    i, block.index
                )));
            }
            if block.offset != expected_offset {
                return Err(Error::delta(format!(
                    "block {} starts at {} (expected {})",
                    i, block.offset, expected_offset
                )));
            }
            let size_ok = if i == last {
                block.length > 0 && block.length <= self.block_size
            } else {
                block.length == self.block_size
            };
            if !size_ok {
                return Err(Error::delta(format!(
                    "block {} has length {} with block size {}",
                    i, block.length, self.block_size
                )));
            }
            expected_offset = block.end();
        }

        Ok(())
    }
}
