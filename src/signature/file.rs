//! .dsig file format reading and writing
//!
//! Layout: 6-byte magic, 1-byte version, little-endian u64 payload length,
//! then the signature as JSON (the same field names the drive API uses).

use super::{FileSignature, SIGNATURE_MAGIC, SIGNATURE_VERSION};
use crate::error::{Error, Result};
use std::path::Path;

const HEADER_LEN: usize = 6 + 1 + 8;

/// Write a signature to a file
pub fn write_signature(sig: &FileSignature, path: &Path) -> Result<()> {
    let data = write_signature_to_bytes(sig)?;
    std::fs::write(path, data).map_err(|e| Error::io(format!("writing signature file {}", path.display()), e))
}

/// Read a signature from a file
pub fn read_signature(path: &Path) -> Result<FileSignature> {
    let data = std::fs::read(path).map_err(|e| Error::read("reading signature file", e))?;
    read_signature_from_bytes(&data)
}

/// Read a signature from bytes
pub fn read_signature_from_bytes(data: &[u8]) -> Result<FileSignature> {
    if data.len() < HEADER_LEN {
        return Err(Error::protocol("signature data too short"));
    }

    if &data[0..6] != SIGNATURE_MAGIC {
        return Err(Error::protocol("invalid signature (bad magic)"));
    }

    if data[6] != SIGNATURE_VERSION {
        return Err(Error::protocol(format!(
            "unsupported signature version {} (expected {})",
            data[6], SIGNATURE_VERSION
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[7..HEADER_LEN]);
    let len = u64::from_le_bytes(len_bytes) as usize;

    let body = data
        .get(HEADER_LEN..HEADER_LEN.saturating_add(len))
        .ok_or_else(|| Error::protocol("signature data truncated"))?;

    let sig: FileSignature = serde_json::from_slice(body)
        .map_err(|e| Error::protocol(format!("deserializing signature: {}", e)))?;
    sig.validate()?;

    Ok(sig)
}

/// Write a signature to bytes
pub fn write_signature_to_bytes(sig: &FileSignature) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(sig)
        .map_err(|e| Error::protocol(format!("serializing signature: {}", e)))?;

    let mut data = Vec::with_capacity(HEADER_LEN + json.len());
    data.extend_from_slice(SIGNATURE_MAGIC);
    data.push(SIGNATURE_VERSION);
    data.extend_from_slice(&(json.len() as u64).to_le_bytes());
    data.extend_from_slice(&json);

    Ok(data)
}
