//! Transport chunks for full uploads
//!
//! A full upload sends the file as fixed-size chunks, each carrying the
//! SHA-256 of its bytes so the remote store can verify and deduplicate it.

use crate::error::{Error, Result};
use crate::signature::generate::read_block;
use crate::signature::{strong_hash, StrongHash};
use bytes::Bytes;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Position of one chunk within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub offset: u64,
    pub length: usize,
}

/// A chunk read from disk, ready to transmit
#[derive(Debug, Clone)]
pub struct TransportChunk {
    pub index: usize,
    pub hash: StrongHash,
    pub data: Bytes,
}

/// Split `file_size` bytes into chunks of `chunk_size` (last one may be short)
pub fn plan_chunks(file_size: u64, chunk_size: usize) -> Vec<ChunkSpan> {
    let chunk_size = chunk_size.max(1) as u64;
    let count = file_size.div_ceil(chunk_size);

    (0..count)
        .map(|index| {
            let offset = index * chunk_size;
            ChunkSpan {
                index: index as usize,
                offset,
                length: (file_size - offset).min(chunk_size) as usize,
            }
        })
        .collect()
}

/// Read and hash one chunk.
///
/// Fails with [`Error::SourceChanged`] when the file no longer holds the
/// bytes the span expects.
pub fn read_chunk(path: &Path, span: ChunkSpan) -> Result<TransportChunk> {
    let mut file = File::open(path).map_err(|e| Error::read("opening file", e))?;
    file.seek(SeekFrom::Start(span.offset))
        .map_err(|e| Error::read("seeking to chunk", e))?;

    let mut buf = vec![0u8; span.length];
    let n = read_block(&mut file, &mut buf)?;
    if n != span.length {
        return Err(Error::source_changed(format!(
            "chunk {} expected {} bytes at offset {}, found {}",
            span.index, span.length, span.offset, n
        )));
    }

    let data = Bytes::from(buf);
    Ok(TransportChunk {
        index: span.index,
        hash: strong_hash(&data),
        data,
    })
}

/// Read a chunk on the blocking pool
pub async fn read_chunk_async(path: &Path, span: ChunkSpan) -> Result<TransportChunk> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_chunk(&path, span))
        .await
        .map_err(|e| Error::read("chunk reader task", std::io::Error::other(e)))?
}
