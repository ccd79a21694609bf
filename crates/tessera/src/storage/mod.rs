//! Storage modes: how data log buckets are allocated, flushed, and read.
//!
//! A [`StorageMode`] hands out fixed-size, zero-initialized byte regions
//! ("buckets") that the data log writes into. Two variants are provided:
//!
//! - [`InMemory`]: buckets live on the heap; `flush` is a no-op.
//! - [`Mapped`]: buckets are memory-mapped files; `flush` is a durability
//!   barrier over the written range.
//!
//! Allocation happens once per bucket on first touch (cold path); the hot
//! read/write paths operate on the returned raw pointers directly, so no
//! per-call dispatch occurs there.

use crate::error::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Mutex;
use tracing::debug;

/// Capability governing how data log bytes are allocated, flushed, and read.
///
/// Implementations must return regions that are zero-initialized and that
/// never move or fault for the lifetime of the storage value.
pub trait StorageMode: Send + Sync + 'static {
    /// Allocates the backing region for `bucket`, `len` bytes long.
    ///
    /// Called at most once per bucket index; the caller serializes
    /// concurrent first touches.
    fn allocate(&self, bucket: usize, len: usize) -> Result<NonNull<u8>>;

    /// Durability barrier over `[offset, offset + len)` of `bucket`.
    fn flush(&self, bucket: usize, offset: usize, len: usize) -> Result<()>;
}

/// Heap-backed storage. Flush is a no-op.
#[derive(Debug, Default)]
pub struct InMemory {
    // (ptr as usize, len) pairs, freed on drop.
    regions: Mutex<Vec<(usize, usize)>>,
}

impl InMemory {
    /// Creates an in-memory storage mode.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageMode for InMemory {
    fn allocate(&self, bucket: usize, len: usize) -> Result<NonNull<u8>> {
        let layout = Layout::array::<u8>(len)
            .map_err(|e| Error::Invariant(format!("bucket layout: {e}")))?;
        // Safety: len is non-zero for any configured bucket size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| Error::Invariant(format!("allocation failed for bucket {bucket}")))?;
        self.regions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((ptr.as_ptr() as usize, len));
        debug!("allocated in-memory bucket {} ({} bytes)", bucket, len);
        Ok(ptr)
    }

    fn flush(&self, _bucket: usize, _offset: usize, _len: usize) -> Result<()> {
        Ok(())
    }
}

impl Drop for InMemory {
    fn drop(&mut self) {
        let regions = self.regions.get_mut().unwrap_or_else(|e| e.into_inner());
        for &(ptr, len) in regions.iter() {
            // Safety: each entry was produced by alloc_zeroed with this layout.
            unsafe {
                dealloc(ptr as *mut u8, Layout::array::<u8>(len).unwrap());
            }
        }
    }
}

/// File-backed storage: one memory-mapped file per bucket under a
/// directory. Flush is an msync over the written range.
#[derive(Debug)]
pub struct Mapped {
    dir: PathBuf,
    maps: Mutex<HashMap<usize, MmapMut>>,
}

impl Mapped {
    /// Opens (creating if needed) a mapped storage directory.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            maps: Mutex::new(HashMap::new()),
        })
    }

    fn bucket_path(&self, bucket: usize) -> PathBuf {
        self.dir.join(format!("bucket_{bucket:08x}.dat"))
    }
}

impl StorageMode for Mapped {
    fn allocate(&self, bucket: usize, len: usize) -> Result<NonNull<u8>> {
        let path = self.bucket_path(bucket);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(len as u64)?;
        // Safety: the file is exclusively managed by this storage value and
        // stays at `len` bytes for its lifetime.
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        let ptr = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| Error::Invariant(format!("mapping failed for bucket {bucket}")))?;
        self.maps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket, map);
        debug!(
            "mapped bucket {} ({} bytes) at {}",
            bucket,
            len,
            path.display()
        );
        Ok(ptr)
    }

    fn flush(&self, bucket: usize, offset: usize, len: usize) -> Result<()> {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let map = maps.get(&bucket).ok_or_else(|| {
            Error::Invariant(format!("flush of unallocated bucket {bucket}"))
        })?;
        map.flush_range(offset, len)?;
        Ok(())
    }
}
