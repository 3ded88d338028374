//! Signature generation: Adler-32 weak checksums plus SHA-256 strong hashes

use super::{BlockFingerprint, FileSignature, StrongHash, MAX_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::mmap::LockedMmap;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Modulus of both Adler-32 accumulators
const ADLER_MOD: u32 = 65521;

/// Files above this size are memory-mapped and hashed in parallel
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Adler-32 checksum of one block.
///
/// Blocks are always aligned and non-overlapping, so this is computed from
/// scratch per block rather than rolled across arbitrary offsets.
pub fn weak_hash(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for &byte in data {
        a = (a + byte as u32) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }

    (b << 16) | a
}

/// SHA-256 digest of one block
pub fn strong_hash(data: &[u8]) -> StrongHash {
    StrongHash(Sha256::digest(data).into())
}

fn fingerprint(index: usize, block_size: usize, chunk: &[u8]) -> BlockFingerprint {
    BlockFingerprint::new(
        index,
        (index * block_size) as u64,
        chunk.len(),
        weak_hash(chunk),
        strong_hash(chunk),
    )
}

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(Error::config("block size must be greater than zero"));
    }
    if block_size > MAX_BLOCK_SIZE {
        return Err(Error::config(format!(
            "block size {} exceeds the {} byte limit",
            block_size, MAX_BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Generate a signature for a file
pub fn generate_signature(path: &Path, block_size: usize) -> Result<FileSignature> {
    check_block_size(block_size)?;

    let file = File::open(path).map_err(|e| Error::read("opening file", e))?;
    let metadata = file.metadata().map_err(|e| Error::read("reading metadata", e))?;
    let file_size = metadata.len();

    if file_size == 0 {
        return Ok(FileSignature::new(block_size));
    }

    if file_size > MMAP_THRESHOLD {
        generate_signature_mmap(file, block_size)
    } else {
        generate_signature_read(file, block_size, file_size)
    }
}

/// Generate signature using memory mapping and parallel hashing (for large files)
fn generate_signature_mmap(file: File, block_size: usize) -> Result<FileSignature> {
    let mmap = LockedMmap::from_file(file)?;

    let signatures: Vec<BlockFingerprint> = mmap
        .par_chunks(block_size)
        .enumerate()
        .map(|(i, chunk)| fingerprint(i, block_size, chunk))
        .collect();

    tracing::debug!(
        blocks = signatures.len(),
        bytes = mmap.len(),
        "Generated signature via mmap"
    );

    Ok(FileSignature {
        block_size,
        signatures,
    })
}

/// Generate signature using standard file reading (for smaller files)
fn generate_signature_read(mut file: File, block_size: usize, file_size: u64) -> Result<FileSignature> {
    let mut sig = FileSignature::new(block_size);
    // A block never holds more than the whole file
    let buf_len = usize::try_from(file_size).map_or(block_size, |size| size.min(block_size));
    let mut buffer = vec![0u8; buf_len];
    let mut index = 0usize;

    loop {
        let bytes_read = read_block(&mut file, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        sig.signatures.push(fingerprint(index, block_size, &buffer[..bytes_read]));
        index += 1;

        if bytes_read < buf_len {
            break;
        }
    }

    Ok(sig)
}

/// Fill `buf` from `reader`, returning fewer bytes only at end of input
pub(crate) fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::read("reading file", e)),
        }
    }
    Ok(filled)
}

/// Generate signature from a byte slice
pub fn generate_signature_from_bytes(data: &[u8], block_size: usize) -> FileSignature {
    let block_size = block_size.max(1);
    let signatures = data
        .chunks(block_size)
        .enumerate()
        .map(|(i, chunk)| fingerprint(i, block_size, chunk))
        .collect();

    FileSignature {
        block_size,
        signatures,
    }
}
