//! In-process drive store
//!
//! Keeps content-addressed chunks, stored files and open sessions in memory.
//! Behaves like the drive service: chunks are deduplicated by hash, sessions
//! are validated on completion, and stored files expose block signatures.
//! Faults can be injected per operation.

use super::SessionRequest;
use crate::delta::{apply_delta, Instruction, NovelBlock};
use crate::error::{Error, Result};
use crate::signature::{generate_signature_from_bytes, strong_hash, FileSignature, StrongHash, DEFAULT_BLOCK_SIZE};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Operations observed by the store, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    OpenSession { filename: String },
    FetchSignature { file_id: String },
    FindFile { filename: String, folder: Option<String> },
    TransmitChunk { session_id: String, index: usize },
    TransmitDelta { session_id: String, instructions: usize, novel_blocks: usize },
    CompleteSession { session_id: String },
}

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Reject every session open (e.g. quota exceeded)
    pub reject_open: bool,
    /// Report no signature for any file
    pub hide_signatures: bool,
    /// Fail every signature fetch (e.g. the signature service is down)
    pub signature_error: bool,
    /// Serve signatures with a zero block size
    pub corrupt_signatures: bool,
    /// Fail the transmission of this chunk index
    pub fail_chunk: Option<usize>,
    /// Fail every delta transmission
    pub fail_delta: bool,
    /// Fail every session completion
    pub fail_complete: bool,
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    folder: Option<String>,
    data: Bytes,
    /// Store order, newest highest
    seq: u64,
}

#[derive(Debug)]
struct OpenSession {
    request: SessionRequest,
    chunks: BTreeMap<usize, StrongHash>,
    reconstructed: Option<Bytes>,
}

#[derive(Debug)]
struct Inner {
    block_size: usize,
    files: DashMap<String, StoredFile>,
    chunks: DashMap<StrongHash, Bytes>,
    sessions: DashMap<String, OpenSession>,
    next_seq: AtomicU64,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<RemoteCall>>,
}

/// In-memory drive store; clones share state
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create a store that fingerprints stored files with the default block size
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create a store that fingerprints stored files with `block_size`
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                block_size: block_size.max(1),
                files: DashMap::new(),
                chunks: DashMap::new(),
                sessions: DashMap::new(),
                next_seq: AtomicU64::new(0),
                faults: Mutex::new(Faults::default()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the injected faults
    pub fn set_faults(&self, faults: Faults) {
        *lock(&self.inner.faults) = faults;
    }

    fn faults(&self) -> Faults {
        lock(&self.inner.faults).clone()
    }

    fn record(&self, call: RemoteCall) {
        lock(&self.inner.calls).push(call);
    }

    /// Every operation received so far
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.inner.calls).clone()
    }

    /// Store a file in the root folder, returning its id
    pub fn insert_file(&self, name: &str, data: impl Into<Bytes>) -> String {
        self.insert_file_in(name, None, data)
    }

    /// Store a file in `folder`, returning its id
    pub fn insert_file_in(&self, name: &str, folder: Option<&str>, data: impl Into<Bytes>) -> String {
        self.store(name.to_string(), folder.map(str::to_string), data.into())
    }

    fn store(&self, name: String, folder: Option<String>, data: Bytes) -> String {
        let file_id = uuid::Uuid::new_v4().to_string();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner
            .files
            .insert(file_id.clone(), StoredFile { name, folder, data, seq });
        file_id
    }

    /// Content of a stored file
    pub fn file_data(&self, file_id: &str) -> Option<Bytes> {
        self.inner.files.get(file_id).map(|f| f.data.clone())
    }

    /// Number of distinct chunks held by the store
    pub fn chunk_count(&self) -> usize {
        self.inner.chunks.len()
    }

    /// Number of sessions opened but not yet completed
    pub fn open_session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub async fn open_session(&self, request: &SessionRequest) -> Result<String> {
        self.record(RemoteCall::OpenSession {
            filename: request.filename.clone(),
        });

        if self.faults().reject_open {
            return Err(Error::session_open("Quota Exceeded"));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        self.inner.sessions.insert(
            session_id.clone(),
            OpenSession {
                request: request.clone(),
                chunks: BTreeMap::new(),
                reconstructed: None,
            },
        );

        tracing::debug!(session_id = %session_id, filename = %request.filename, "Session opened");
        Ok(session_id)
    }

    pub async fn fetch_signature(&self, file_id: &str) -> Result<Option<FileSignature>> {
        self.record(RemoteCall::FetchSignature {
            file_id: file_id.to_string(),
        });

        let faults = self.faults();
        if faults.signature_error {
            return Err(Error::signature_unavailable(file_id, "signature service unavailable"));
        }
        if faults.hide_signatures {
            return Ok(None);
        }

        let Some(file) = self.inner.files.get(file_id) else {
            return Ok(None);
        };

        // Mirrors the drive service, which has no signature for a file without chunks
        if file.data.is_empty() {
            return Ok(None);
        }

        let mut signature = generate_signature_from_bytes(&file.data, self.inner.block_size);
        if faults.corrupt_signatures {
            signature.block_size = 0;
        }
        Ok(Some(signature))
    }

    /// Newest stored file named `filename` in `folder` (root when `None`)
    pub async fn find_file(&self, filename: &str, folder: Option<&str>) -> Result<Option<String>> {
        self.record(RemoteCall::FindFile {
            filename: filename.to_string(),
            folder: folder.map(str::to_string),
        });

        let found = self
            .inner
            .files
            .iter()
            .filter(|entry| entry.name == filename && entry.folder.as_deref() == folder)
            .max_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone());
        Ok(found)
    }

    pub async fn transmit_chunk(&self, session_id: &str, index: usize, hash: &StrongHash, data: Bytes) -> Result<()> {
        self.record(RemoteCall::TransmitChunk {
            session_id: session_id.to_string(),
            index,
        });

        if self.faults().fail_chunk == Some(index) {
            return Err(Error::transmission(session_id, format!("chunk {} rejected", index)));
        }

        let mut session = self
            .inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::transmission(session_id, "Session not found"))?;

        if strong_hash(&data) != *hash {
            return Err(Error::transmission(session_id, format!("chunk {} hash mismatch", index)));
        }

        self.inner.chunks.entry(*hash).or_insert(data);
        session.chunks.insert(index, *hash);
        Ok(())
    }

    pub async fn transmit_delta(
        &self,
        session_id: &str,
        instructions: &[Instruction],
        novel_blocks: &[NovelBlock],
    ) -> Result<()> {
        self.record(RemoteCall::TransmitDelta {
            session_id: session_id.to_string(),
            instructions: instructions.len(),
            novel_blocks: novel_blocks.len(),
        });

        if self.faults().fail_delta {
            return Err(Error::transmission(session_id, "delta rejected"));
        }

        let mut session = self
            .inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::transmission(session_id, "Session not found"))?;

        let base_id = session
            .request
            .base_file_id
            .clone()
            .ok_or_else(|| Error::transmission(session_id, "session has no base file"))?;
        let base = self
            .inner
            .files
            .get(&base_id)
            .map(|f| f.data.clone())
            .ok_or_else(|| Error::transmission(session_id, format!("base file {} not found", base_id)))?;

        let plan = crate::delta::DeltaPlan {
            instructions: instructions.to_vec(),
            novel_blocks: novel_blocks.to_vec(),
            ..Default::default()
        };
        let blocks: Vec<&[u8]> = base.chunks(self.inner.block_size).collect();
        let rebuilt = apply_delta(&plan, &blocks).map_err(|e| Error::transmission(session_id, e.to_string()))?;

        session.reconstructed = Some(Bytes::from(rebuilt));
        Ok(())
    }

    pub async fn complete_session(&self, session_id: &str) -> Result<String> {
        self.record(RemoteCall::CompleteSession {
            session_id: session_id.to_string(),
        });

        if self.faults().fail_complete {
            return Err(Error::finalize(session_id, "commit failed"));
        }

        let (_, session) = self
            .inner
            .sessions
            .remove(session_id)
            .ok_or_else(|| Error::finalize(session_id, "Session missing"))?;

        let data = match session.reconstructed {
            Some(data) => data,
            None => self.assemble(session_id, &session)?,
        };

        if data.len() as u64 != session.request.total_size {
            return Err(Error::finalize(
                session_id,
                format!(
                    "received {} bytes, session declared {}",
                    data.len(),
                    session.request.total_size
                ),
            ));
        }

        let file_id = self.store(
            session.request.filename.clone(),
            session.request.parent_folder.clone(),
            data,
        );

        tracing::debug!(session_id = %session_id, file_id = %file_id, "Session committed");
        Ok(file_id)
    }

    fn assemble(&self, session_id: &str, session: &OpenSession) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(session.request.total_size as usize);

        for (expected, (index, hash)) in session.chunks.iter().enumerate() {
            if *index != expected {
                return Err(Error::finalize(session_id, format!("Missing chunk #{}", expected)));
            }
            let chunk = self
                .inner
                .chunks
                .get(hash)
                .ok_or_else(|| Error::finalize(session_id, format!("chunk {} not stored", hash)))?;
            out.extend_from_slice(&chunk);
        }

        Ok(out.freeze())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_are_deduplicated() {
        let remote = MemoryRemote::new();
        let chunk = Bytes::from_static(b"same bytes");
        let hash = strong_hash(&chunk);

        for _ in 0..2 {
            let session = remote
                .open_session(&SessionRequest::new("a.txt", chunk.len() as u64))
                .await
                .unwrap();
            remote.transmit_chunk(&session, 0, &hash, chunk.clone()).await.unwrap();
            remote.complete_session(&session).await.unwrap();
        }

        assert_eq!(remote.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_completion() {
        let remote = MemoryRemote::new();
        let session = remote.open_session(&SessionRequest::new("a.bin", 6)).await.unwrap();

        let chunk = Bytes::from_static(b"abc");
        remote
            .transmit_chunk(&session, 1, &strong_hash(&chunk), chunk)
            .await
            .unwrap();

        let err = remote.complete_session(&session).await.unwrap_err();
        assert!(matches!(err, Error::Finalize { .. }));
        assert_eq!(remote.open_session_count(), 0);
    }

    #[tokio::test]
    async fn test_hash_mismatch_rejected() {
        let remote = MemoryRemote::new();
        let session = remote.open_session(&SessionRequest::new("a.bin", 3)).await.unwrap();

        let err = remote
            .transmit_chunk(&session, 0, &strong_hash(b"xyz"), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transmission { .. }));
    }

    #[tokio::test]
    async fn test_signature_of_stored_file() {
        let remote = MemoryRemote::with_block_size(4);
        let file_id = remote.insert_file("f", Bytes::from_static(b"0123456789"));

        let sig = remote.fetch_signature(&file_id).await.unwrap().unwrap();
        assert_eq!(sig.block_size, 4);
        assert_eq!(sig.block_count(), 3);

        assert!(remote.fetch_signature("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_file_by_name_and_folder() {
        let remote = MemoryRemote::new();
        remote.insert_file("report.pdf", Bytes::from_static(b"v1"));
        let newer = remote.insert_file("report.pdf", Bytes::from_static(b"v2"));
        let in_folder = remote.insert_file_in("report.pdf", Some("docs"), Bytes::from_static(b"v3"));

        assert_eq!(remote.find_file("report.pdf", None).await.unwrap(), Some(newer));
        assert_eq!(remote.find_file("report.pdf", Some("docs")).await.unwrap(), Some(in_folder));
        assert_eq!(remote.find_file("other.pdf", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_signature_faults() {
        let remote = MemoryRemote::with_block_size(4);
        let file_id = remote.insert_file("f", Bytes::from_static(b"0123456789"));

        remote.set_faults(Faults {
            signature_error: true,
            ..Default::default()
        });
        let err = remote.fetch_signature(&file_id).await.unwrap_err();
        assert!(matches!(err, Error::SignatureUnavailable { .. }));

        remote.set_faults(Faults {
            corrupt_signatures: true,
            ..Default::default()
        });
        let sig = remote.fetch_signature(&file_id).await.unwrap().unwrap();
        assert!(sig.validate().is_err());
    }

    #[tokio::test]
    async fn test_rejected_open() {
        let remote = MemoryRemote::new();
        remote.set_faults(Faults {
            reject_open: true,
            ..Default::default()
        });

        let err = remote.open_session(&SessionRequest::new("a", 1)).await.unwrap_err();
        assert!(matches!(err, Error::SessionOpen { .. }));
    }
}
