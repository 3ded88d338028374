//! Memory-mapped read access to large local files
//!
//! A shared lock is taken before mapping so cooperating writers cannot
//! truncate the file underneath the map while blocks are being hashed or
//! extracted. Writers that ignore advisory locks are caught later by the
//! length and hash checks in delta computation.

use crate::error::{Error, Result};
use fs2::FileExt;
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

/// A memory-mapped file with an associated shared (read) lock.
///
/// The lock is held for the lifetime of this struct and released when the
/// file handle is dropped.
pub struct LockedMmap {
    mmap: Mmap,
    #[allow(dead_code)]
    file: File,
}

impl LockedMmap {
    /// Open a file and map it under a shared lock
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::read("opening file for mmap", e))?;
        Self::from_file(file)
    }

    /// Map an already-opened file under a shared lock
    pub fn from_file(file: File) -> Result<Self> {
        file.lock_shared()
            .map_err(|e| Error::read("acquiring shared file lock", e))?;

        // Safety: the shared lock keeps cooperating processes from truncating
        // the file while the map is alive.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::read("memory mapping file", e))?;

        Ok(Self { mmap, file })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Deref for LockedMmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.mmap
    }
}

impl AsRef<[u8]> for LockedMmap {
    fn as_ref(&self) -> &[u8] {
        &self.mmap
    }
}
