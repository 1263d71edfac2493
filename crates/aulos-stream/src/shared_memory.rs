//! Named shared-memory regions for cross-process primitives.
//!
//! Regions are file-backed maps under `/dev/shm` (temp dir on non-Linux),
//! addressed by name so a peer process can attach from a serialized
//! [`RegionHandle`]. The creator owns the backing file and unlinks it on drop;
//! attached mappings stay valid until every side drops, which is what gives
//! the pool+queue triples their joint-ownership lifetime.

use crate::error::{Result, StreamError};
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Serializable reference to a shared region another process can attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHandle {
    pub name: String,
    pub len: usize,
}

/// One mapped shared-memory region.
///
/// Uses `UnsafeCell` for interior mutability since the underlying mapping is
/// shared between processes and written through an immutable reference. The
/// primitives built on top (queues, block pools) provide their own
/// synchronization via atomics stored inside the region.
pub struct SharedRegion {
    mmap: UnsafeCell<MmapMut>,
    name: String,
    len: usize,
    /// Creator owns the backing file and cleans up on drop.
    owns_memory: bool,
}

// SAFETY: all mutation goes through raw pointers handed out by `as_ptr`, and
// every primitive layered on this region coordinates with atomics inside the
// mapping itself. The mapping is shared between processes and is already
// synchronized at the OS level.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a fresh zero-filled region.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let path = Self::shm_path(name);
        // Unlink any leftover region first: mappings of the old inode stay
        // valid, so a name reuse never truncates pages out from under a
        // still-attached peer.
        let _ = std::fs::remove_file(&path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| {
                StreamError::SharedMemory(format!("failed to create shared memory file: {e}"))
            })?;

        file.set_len(len as u64)
            .map_err(|e| StreamError::SharedMemory(format!("failed to set region size: {e}")))?;

        // SAFETY: the file was just created with the requested length and is
        // only shared with processes that follow the in-region protocol.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| StreamError::SharedMemory(format!("failed to map region: {e}")))?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: name.to_string(),
            len,
            owns_memory: true,
        })
    }

    /// Attach to a region created elsewhere.
    pub fn attach(handle: &RegionHandle) -> Result<Self> {
        let path = Self::shm_path(&handle.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                StreamError::SharedMemory(format!("failed to open shared memory file: {e}"))
            })?;

        let actual = file
            .metadata()
            .map_err(|e| StreamError::SharedMemory(format!("failed to stat region: {e}")))?
            .len() as usize;
        if actual < handle.len {
            return Err(StreamError::RegionSizeMismatch {
                expected: handle.len,
                actual,
            });
        }

        // SAFETY: same contract as `create`; the creator sized the file.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| StreamError::SharedMemory(format!("failed to map region: {e}")))?;

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            name: handle.name.clone(),
            len: handle.len,
            owns_memory: false,
        })
    }

    pub fn handle(&self) -> RegionHandle {
        RegionHandle {
            name: self.name.clone(),
            len: self.len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the mapping. Callers are responsible for staying in
    /// bounds and for cross-process synchronization.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        // SAFETY: the UnsafeCell only mediates interior mutability; the
        // mapping itself outlives this borrow.
        unsafe { (*self.mmap.get()).as_mut_ptr() }
    }

    fn shm_path(name: &str) -> PathBuf {
        #[cfg(target_os = "linux")]
        let base = PathBuf::from("/dev/shm");

        #[cfg(not(target_os = "linux"))]
        let base = std::env::temp_dir();

        base.join(name)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owns_memory {
            let _ = std::fs::remove_file(Self::shm_path(&self.name));
        }
    }
}
