//! Shared memory regions and their transport descriptors
//!
//! A region is an anonymous, zero-filled, page-aligned memory map. Handles are
//! reference counted: every `SharedMemory` clone refers to the same mapping,
//! which is unmapped when the last handle goes away.

use crate::binding::parcel::Parcel;
use crate::error::{AAudioError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest region size accepted from a peer
pub const MAX_MMAP_SIZE_BYTES: i32 = 32 * 1024 * 8;

/// Largest offset into a region accepted from a peer
pub const MAX_MMAP_OFFSET_BYTES: i32 = 32 * 1024 * 8;

struct Mapping {
    name: String,
    base: NonNull<u8>,
    len: usize,
    // Keeps the pages mapped; `base` points into it and never moves.
    _map: MmapMut,
}

// SAFETY: the mapping is plain memory owned by `_map`. Concurrent access is
// coordinated by the FIFO counters, which only hand out disjoint byte ranges to
// the single reader and the single writer.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// Handle to a shared memory region
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<Mapping>,
}

impl SharedMemory {
    /// Map a new zero-filled region of `size` bytes
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(AAudioError::out_of_range("region size", size as i64));
        }

        let mut map = MmapOptions::new().len(size).map_anon().map_err(|e| {
            debug!("Failed to map {} bytes for {}: {}", size, name, e);
            AAudioError::NoMemory
        })?;

        let base = NonNull::new(map.as_mut_ptr()).ok_or(AAudioError::NoMemory)?;
        trace!("Mapped shared region {} ({} bytes)", name, size);

        Ok(Self {
            inner: Arc::new(Mapping {
                name: name.to_string(),
                base,
                len: size,
                _map: map,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Whether two handles refer to the same mapping
    pub fn same_region(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this mapping
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Borrow a byte range of the region
    pub fn slice(&self, offset: usize, len: usize) -> Result<MemorySlice> {
        match offset.checked_add(len) {
            Some(end) if end <= self.inner.len => Ok(MemorySlice {
                memory: self.clone(),
                offset,
                len,
            }),
            _ => Err(AAudioError::out_of_range("region offset", offset as i64)),
        }
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.inner.name)
            .field("len", &self.inner.len)
            .finish()
    }
}

/// A bounds-checked byte range inside a shared region
///
/// Copies in and out of the slice are plain memory copies. Callers must make
/// sure no two threads touch overlapping bytes at the same time; the FIFO
/// guarantees this by publishing counters only after the copy completes.
#[derive(Clone, Debug)]
pub struct MemorySlice {
    memory: SharedMemory,
    offset: usize,
    len: usize,
}

impl MemorySlice {
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        // SAFETY: offset + len was checked against the mapping length when the
        // slice was created.
        unsafe { self.memory.inner.base.as_ptr().add(self.offset) }
    }

    /// Copy `src` into the slice starting at byte `at`
    pub(crate) fn write_at(&self, at: usize, src: &[u8]) {
        assert!(at + src.len() <= self.len, "shared write out of bounds");
        // SAFETY: bounds asserted above; the source is a distinct Rust slice.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.as_ptr().add(at), src.len());
        }
    }

    /// Copy bytes starting at `at` into `dst`
    pub(crate) fn read_at(&self, at: usize, dst: &mut [u8]) {
        assert!(at + dst.len() <= self.len, "shared read out of bounds");
        // SAFETY: bounds asserted above; the destination is a distinct Rust slice.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(at), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Zero `len` bytes starting at `at`
    pub(crate) fn zero(&self, at: usize, len: usize) {
        assert!(at + len <= self.len, "shared zero out of bounds");
        // SAFETY: bounds asserted above.
        unsafe {
            std::ptr::write_bytes(self.as_ptr().add(at), 0, len);
        }
    }
}

/// Transport descriptor for one shared memory region: a handle plus its size
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryParcelable {
    handle: Option<SharedMemory>,
    size_in_bytes: i32,
}

impl SharedMemoryParcelable {
    pub fn new(memory: SharedMemory, size_in_bytes: i32) -> Self {
        Self {
            handle: Some(memory),
            size_in_bytes,
        }
    }

    pub fn size_in_bytes(&self) -> i32 {
        self.size_in_bytes
    }

    pub fn handle(&self) -> Option<&SharedMemory> {
        self.handle.as_ref()
    }

    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.size_in_bytes);
        parcel.write_handle(self.handle.as_ref());
    }

    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let size_in_bytes = parcel.read_i32()?;
        let handle = parcel.read_handle()?;
        Ok(Self {
            handle,
            size_in_bytes,
        })
    }

    /// Check the declared size before trusting a descriptor from a peer
    pub fn validate(&self) -> Result<()> {
        if self.size_in_bytes < 0 || self.size_in_bytes >= MAX_MMAP_SIZE_BYTES {
            return Err(AAudioError::out_of_range(
                "shared memory size",
                self.size_in_bytes,
            ));
        }
        if self.size_in_bytes > 0 {
            match &self.handle {
                None => return Err(AAudioError::illegal_argument("shared memory handle", -1)),
                Some(memory) if memory.len() < self.size_in_bytes as usize => {
                    return Err(AAudioError::out_of_range(
                        "shared memory size",
                        self.size_in_bytes,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Resolve `(offset, size)` inside this region into an addressable slice
    pub fn resolve(&self, offset_in_bytes: i32, size_in_bytes: i32) -> Result<MemorySlice> {
        if offset_in_bytes < 0 {
            return Err(AAudioError::out_of_range("region offset", offset_in_bytes));
        }
        if size_in_bytes < 0 || offset_in_bytes as i64 + size_in_bytes as i64 > self.size_in_bytes as i64
        {
            return Err(AAudioError::out_of_range(
                "region size",
                offset_in_bytes as i64 + size_in_bytes as i64,
            ));
        }
        let memory = self
            .handle
            .as_ref()
            .ok_or_else(|| AAudioError::internal("resolving a closed shared memory region"))?;
        memory
            .slice(offset_in_bytes as usize, size_in_bytes as usize)
            .map_err(|_| AAudioError::internal("declared region larger than its mapping"))
    }

    /// Release the handle
    pub fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(memory) => {
                trace!("Closing shared region {}", memory.name());
                Ok(())
            }
            None if self.size_in_bytes == 0 => Ok(()),
            None => Err(AAudioError::invalid_state("shared memory already closed")),
        }
    }
}
