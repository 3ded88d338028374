//! Remote drive stores that persist chunks and serve stored signatures

pub mod http;
pub mod memory;

use crate::delta::{Instruction, NovelBlock};
use crate::error::Result;
use crate::signature::{FileSignature, StrongHash};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use http::HttpRemote;
pub use memory::{Faults, MemoryRemote, RemoteCall};

/// Parameters for opening an upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Name of the file being uploaded
    pub filename: String,
    /// Declared size of the new content in bytes
    pub total_size: u64,
    /// Destination folder (root when absent)
    pub parent_folder: Option<String>,
    /// Stored version that delta `Copy` instructions refer to
    pub base_file_id: Option<String>,
}

impl SessionRequest {
    pub fn new(filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            filename: filename.into(),
            total_size,
            parent_folder: None,
            base_file_id: None,
        }
    }

    pub fn with_parent_folder(mut self, folder: Option<String>) -> Self {
        self.parent_folder = folder;
        self
    }

    pub fn with_base_file(mut self, file_id: Option<String>) -> Self {
        self.base_file_id = file_id;
        self
    }
}

/// Remote store enum for unified access to the supported backends
#[derive(Clone)]
pub enum RemoteStore {
    Memory(MemoryRemote),
    Http(HttpRemote),
}

impl RemoteStore {
    /// Create an in-process store
    pub fn memory() -> Self {
        RemoteStore::Memory(MemoryRemote::new())
    }

    /// Create a store backed by the drive REST API
    pub fn http(base_url: &str, token: Option<&str>) -> Result<Self> {
        Ok(RemoteStore::Http(HttpRemote::new(base_url, token)?))
    }

    /// Get the name of this backend (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            RemoteStore::Memory(_) => "memory",
            RemoteStore::Http(_) => "http",
        }
    }

    /// Open an upload session, returning its opaque id
    pub async fn open_session(&self, request: &SessionRequest) -> Result<String> {
        match self {
            RemoteStore::Memory(r) => r.open_session(request).await,
            RemoteStore::Http(r) => r.open_session(request).await,
        }
    }

    /// Fetch the stored signature of a file, `None` if the store has none
    pub async fn fetch_signature(&self, file_id: &str) -> Result<Option<FileSignature>> {
        match self {
            RemoteStore::Memory(r) => r.fetch_signature(file_id).await,
            RemoteStore::Http(r) => r.fetch_signature(file_id).await,
        }
    }

    /// Look up a stored file by name within a folder (root when `None`)
    pub async fn find_file(&self, filename: &str, folder: Option<&str>) -> Result<Option<String>> {
        match self {
            RemoteStore::Memory(r) => r.find_file(filename, folder).await,
            RemoteStore::Http(r) => r.find_file(filename, folder).await,
        }
    }

    /// Send one whole-file transport chunk
    pub async fn transmit_chunk(&self, session_id: &str, index: usize, hash: &StrongHash, data: Bytes) -> Result<()> {
        match self {
            RemoteStore::Memory(r) => r.transmit_chunk(session_id, index, hash, data).await,
            RemoteStore::Http(r) => r.transmit_chunk(session_id, index, hash, data).await,
        }
    }

    /// Send reconstruction instructions with the novel blocks they reference
    pub async fn transmit_delta(
        &self,
        session_id: &str,
        instructions: &[Instruction],
        novel_blocks: &[NovelBlock],
    ) -> Result<()> {
        match self {
            RemoteStore::Memory(r) => r.transmit_delta(session_id, instructions, novel_blocks).await,
            RemoteStore::Http(r) => r.transmit_delta(session_id, instructions, novel_blocks).await,
        }
    }

    /// Commit a session, returning the resulting file id
    pub async fn complete_session(&self, session_id: &str) -> Result<String> {
        match self {
            RemoteStore::Memory(r) => r.complete_session(session_id).await,
            RemoteStore::Http(r) => r.complete_session(session_id).await,
        }
    }
}
