use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::{OffHeapMapError, Result};

/// Largest single allocation a segment may request (2^31 - 1 bytes).
pub const MAX_SEGMENT_BYTES: usize = i32::MAX as usize;

const DEFAULT_FILE_PREFIX: &str = "offheap_map";

static NEXT_FILE_INDEX: AtomicU64 = AtomicU64::new(0);

/// A fixed-capacity block of raw bytes with a stable base address.
///
/// Every byte must read as zero right after allocation: an all-zero key is
/// what the codecs treat as an empty slot.
pub trait MemorySegment: AsRef<[u8]> + AsMut<[u8]> {
    fn capacity_bytes(&self) -> usize {
        self.as_ref().len()
    }

    fn base_address(&self) -> *const u8 {
        self.as_ref().as_ptr()
    }

    /// Releases the underlying allocation.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Hands out zeroed segments of a requested capacity.
pub trait SegmentAllocator {
    type Segment: MemorySegment;

    fn allocate(&mut self, capacity_bytes: usize) -> Result<Self::Segment>;
}

/// Process-local zero-filled allocation, not backed by any file.
pub struct AnonSegment {
    bytes: Box<[u8]>,
}

impl AnonSegment {
    pub fn allocate(capacity_bytes: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity_bytes)
            .map_err(|source| OffHeapMapError::Allocation {
                capacity: capacity_bytes,
                source,
            })?;
        bytes.resize(capacity_bytes, 0);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }
}

impl AsRef<[u8]> for AnonSegment {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for AnonSegment {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl MemorySegment for AnonSegment {
    fn close(self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AnonAllocator;

impl SegmentAllocator for AnonAllocator {
    type Segment = AnonSegment;

    fn allocate(&mut self, capacity_bytes: usize) -> Result<AnonSegment> {
        tracing::trace!(capacity_bytes, "allocating anonymous segment");
        AnonSegment::allocate(capacity_bytes)
    }
}

/// A segment backed by a memory-mapped file that lives only as long as the segment.
///
/// The file is named `<dir>/<prefix>_<n>.dat` where `n` comes from a process
/// wide counter, so several live tables can share a directory.
pub struct MmapSegment {
    mmap: Option<MmapMut>,
    file: Option<File>,
    path: PathBuf,
    released: bool,
}

impl MmapSegment {
    pub fn create(dir: &Path, prefix: &str, capacity_bytes: usize) -> Result<Self> {
        let index = NEXT_FILE_INDEX.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{prefix}_{index}.dat"));

        if path.exists() {
            fs::remove_file(&path).map_err(|source| OffHeapMapError::FileDelete {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| OffHeapMapError::FileCreate {
                path: path.clone(),
                source,
            })?;

        // From here on a failure drops the segment, which removes the file.
        let mut segment = Self {
            mmap: None,
            file: None,
            path,
            released: false,
        };
        // set_len extends with zeros, which gives us the empty-slot pattern for free
        file.set_len(capacity_bytes as u64)?;
        // SAFETY: the file was created above under a unique name and is only
        // reachable through this segment until it is deleted.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        segment.mmap = Some(mmap);
        segment.file = Some(file);

        tracing::debug!(
            path = %segment.path.display(),
            capacity_bytes,
            "created file-backed segment"
        );
        Ok(segment)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        drop(self.mmap.take());
        drop(self.file.take());
        fs::remove_file(&self.path).map_err(|source| OffHeapMapError::FileDelete {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "deleted file-backed segment");
        Ok(())
    }
}

impl AsRef<[u8]> for MmapSegment {
    fn as_ref(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl AsMut<[u8]> for MmapSegment {
    fn as_mut(&mut self) -> &mut [u8] {
        self.mmap.as_deref_mut().unwrap_or(&mut [])
    }
}

impl MemorySegment for MmapSegment {
    fn close(mut self) -> Result<()> {
        self.release()
    }
}

impl Drop for MmapSegment {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.release() {
                tracing::warn!(%err, "file-backed segment dropped without close");
            }
        }
    }
}

/// Allocates file-backed segments under a directory.
#[derive(Debug, Clone)]
pub struct MmapAllocator {
    dir: PathBuf,
    prefix: String,
}

impl MmapAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_prefix(dir, DEFAULT_FILE_PREFIX)
    }

    pub fn with_prefix(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SegmentAllocator for MmapAllocator {
    type Segment = MmapSegment;

    fn allocate(&mut self, capacity_bytes: usize) -> Result<MmapSegment> {
        tracing::trace!(capacity_bytes, dir = %self.dir.display(), "allocating file-backed segment");
        MmapSegment::create(&self.dir, &self.prefix, capacity_bytes)
    }
}
