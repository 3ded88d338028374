//! Delta computation against a stored file's signature
//!
//! Both sides hash aligned, non-overlapping blocks of the same size, so
//! matching is a hash-table lookup per local block keyed on the strong hash.
//! No sliding-window search is needed.

use super::{DeltaPlan, DeltaStats, Instruction, NovelBlock};
use crate::error::{Error, Result};
use crate::mmap::LockedMmap;
use crate::signature::{strong_hash, FileSignature, StrongHash};
use bytes::Bytes;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files above this size are memory-mapped instead of read into memory
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Compute the delta that turns the stored version into `local_data`.
///
/// `local` must be the signature of `local_data`; a length or content
/// mismatch means the file changed after it was fingerprinted.
pub fn compute_delta(local: &FileSignature, remote: &FileSignature, local_data: &[u8]) -> Result<DeltaPlan> {
    let expected = local.file_size();
    if local_data.len() as u64 != expected {
        return Err(Error::source_changed(format!(
            "file is {} bytes but its signature covers {} bytes",
            local_data.len(),
            expected
        )));
    }

    // First occurrence wins so repeated remote content always maps to the lowest index
    let mut remote_index: HashMap<StrongHash, usize> = HashMap::with_capacity(remote.block_count());
    for block in &remote.signatures {
        remote_index.entry(block.strong_hash).or_insert(block.index);
    }

    tracing::debug!(
        local_blocks = local.block_count(),
        remote_blocks = remote.block_count(),
        block_size = local.block_size,
        "Starting delta computation"
    );

    let mut instructions = Vec::with_capacity(local.block_count());
    let mut novel_blocks = Vec::new();
    let mut delta_size = 0u64;

    for block in &local.signatures {
        if let Some(&source_index) = remote_index.get(&block.strong_hash) {
            instructions.push(Instruction::Copy {
                source_index,
                dest_index: block.index,
                length: block.length,
            });
            continue;
        }

        let start = block.offset as usize;
        let data = &local_data[start..start + block.length];
        if strong_hash(data) != block.strong_hash {
            return Err(Error::source_changed(format!(
                "block {} content differs from its fingerprint",
                block.index
            )));
        }

        instructions.push(Instruction::Insert {
            block_index: novel_blocks.len(),
            dest_index: block.index,
            length: block.length,
        });
        novel_blocks.push(NovelBlock {
            dest_index: block.index,
            data: Bytes::copy_from_slice(data),
        });
        delta_size += block.length as u64;
    }

    let stats = DeltaStats::new(
        local.block_count(),
        novel_blocks.len(),
        expected,
        delta_size,
    );

    tracing::debug!(
        total = stats.total_blocks,
        novel = stats.novel_blocks,
        reused = stats.reused_blocks,
        savings_percent = format!("{:.1}", stats.savings_percent),
        "Delta computation complete"
    );

    Ok(DeltaPlan {
        instructions,
        novel_blocks,
        stats,
    })
}

/// Re-read the local file and compute its delta.
///
/// The file is read a second time after fingerprinting; any change in
/// between surfaces as [`Error::SourceChanged`].
pub fn compute_delta_from_path(local: &FileSignature, remote: &FileSignature, path: &Path) -> Result<DeltaPlan> {
    let mut file = File::open(path).map_err(|e| Error::read("opening file", e))?;
    let size = file
        .metadata()
        .map_err(|e| Error::read("reading metadata", e))?
        .len();

    if size > MMAP_THRESHOLD {
        let mmap = LockedMmap::from_file(file)?;
        compute_delta(local, remote, &mmap)
    } else {
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)
            .map_err(|e| Error::read("reading file", e))?;
        compute_delta(local, remote, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::generate_signature_from_bytes;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_identical_files() {
        let data = patterned(9000, 1);
        let sig = generate_signature_from_bytes(&data, 1024);
        let plan = compute_delta(&sig, &sig, &data).unwrap();

        assert!(plan.novel_blocks.is_empty());
        assert!(plan.instructions.iter().all(Instruction::is_copy));
        assert_eq!(plan.stats.savings_percent, 100.0);
    }

    #[test]
    fn test_instructions_follow_dest_order() {
        let old = patterned(4096, 1);
        let mut new = patterned(4096, 2);
        new[1024..2048].copy_from_slice(&old[0..1024]);

        let remote = generate_signature_from_bytes(&old, 1024);
        let local = generate_signature_from_bytes(&new, 1024);
        let plan = compute_delta(&local, &remote, &new).unwrap();

        let dests: Vec<usize> = plan.instructions.iter().map(Instruction::dest_index).collect();
        assert_eq!(dests, vec![0, 1, 2, 3]);
        assert_eq!(
            plan.instructions[1],
            Instruction::Copy {
                source_index: 0,
                dest_index: 1,
                length: 1024
            }
        );
    }

    #[test]
    fn test_repeated_content_references_same_remote_block() {
        let block = vec![0xAB; 512];
        let old = block.clone();
        let new: Vec<u8> = block.iter().chain(block.iter()).chain(block.iter()).copied().collect();

        let remote = generate_signature_from_bytes(&old, 512);
        let local = generate_signature_from_bytes(&new, 512);
        let plan = compute_delta(&local, &remote, &new).unwrap();

        assert_eq!(plan.stats.reused_blocks, 3);
        for instruction in &plan.instructions {
            assert!(matches!(instruction, Instruction::Copy { source_index: 0, .. }));
        }
    }

    #[test]
    fn test_insert_indices_point_into_novel_blocks() {
        let old = patterned(3000, 1);
        let new = patterned(3000, 9);
        let remote = generate_signature_from_bytes(&old, 1000);
        let local = generate_signature_from_bytes(&new, 1000);
        let plan = compute_delta(&local, &remote, &new).unwrap();

        for (i, instruction) in plan.instructions.iter().enumerate() {
            match instruction {
                Instruction::Insert { block_index, dest_index, .. } => {
                    assert_eq!(*block_index, i);
                    assert_eq!(plan.novel_blocks[*block_index].dest_index, *dest_index);
                }
                Instruction::Copy { .. } => panic!("unexpected copy"),
            }
        }
        assert_eq!(plan.novel_bytes(), 3000);
        assert_eq!(plan.stats.delta_size, 3000);
    }

    #[test]
    fn test_length_mismatch_is_source_changed() {
        let data = patterned(5000, 3);
        let sig = generate_signature_from_bytes(&data, 1024);
        let err = compute_delta(&sig, &FileSignature::new(1024), &data[..4000]).unwrap_err();
        assert!(matches!(err, Error::SourceChanged { .. }));
    }

    #[test]
    fn test_content_mismatch_is_source_changed() {
        let data = patterned(5000, 3);
        let sig = generate_signature_from_bytes(&data, 1024);
        let mut mutated = data.clone();
        mutated[10] ^= 0xFF;

        let err = compute_delta(&sig, &FileSignature::new(1024), &mutated).unwrap_err();
        assert!(matches!(err, Error::SourceChanged { .. }));
    }

    #[test]
    fn test_from_path_detects_rewrite() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&patterned(6000, 4)).unwrap();
        let sig = generate_signature_from_bytes(&patterned(6000, 4), 2048);

        let plan = compute_delta_from_path(&sig, &sig, file.path()).unwrap();
        assert_eq!(plan.stats.reused_blocks, 3);

        std::fs::write(file.path(), patterned(7000, 4)).unwrap();
        let err = compute_delta_from_path(&sig, &sig, file.path()).unwrap_err();
        assert!(matches!(err, Error::SourceChanged { .. }));
    }

    #[test]
    fn test_from_path_large_file_uses_mapped_reads() {
        let old = patterned(MMAP_THRESHOLD as usize + 10_000, 6);
        let mut new = old.clone();
        new[MMAP_THRESHOLD as usize] ^= 0xFF;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&new).unwrap();
        file.flush().unwrap();

        let remote = generate_signature_from_bytes(&old, 1 << 20);
        let local = crate::signature::generate_signature(file.path(), 1 << 20).unwrap();
        assert_eq!(local, generate_signature_from_bytes(&new, 1 << 20));

        let plan = compute_delta_from_path(&local, &remote, file.path()).unwrap();
        assert_eq!(plan.stats.total_blocks, 11);
        assert_eq!(plan.stats.novel_blocks, 1);
        assert_eq!(plan.novel_blocks[0].data.len(), 10_000);
    }
}
