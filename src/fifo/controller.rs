//! Read/write cursor bookkeeping for a fixed-capacity FIFO
//!
//! Counters grow monotonically and are never reduced modulo the capacity; the
//! position inside the backing array is derived on demand. Each side only
//! advances its own counter. Counter stores use `Release` after the data copy
//! and loads use `Acquire` before touching data, so the other side never sees
//! an advanced counter ahead of the bytes it covers.

use crate::binding::{MemorySlice, COUNTER_SIZE_BYTES};
use crate::error::{AAudioError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Storage for the read and write counters
pub trait FifoCounters: Send + Sync {
    fn read_counter(&self) -> u64;
    fn write_counter(&self) -> u64;
    fn set_read_counter(&self, value: u64);
    fn set_write_counter(&self, value: u64);
}

/// Counters held in process-local memory
#[derive(Debug, Default)]
pub struct LocalCounters {
    read: AtomicU64,
    write: AtomicU64,
}

impl LocalCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FifoCounters for LocalCounters {
    fn read_counter(&self) -> u64 {
        self.read.load(Ordering::Acquire)
    }

    fn write_counter(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    fn set_read_counter(&self, value: u64) {
        self.read.store(value, Ordering::Release);
    }

    fn set_write_counter(&self, value: u64) {
        self.write.store(value, Ordering::Release);
    }
}

/// One counter word inside a shared region
#[derive(Debug, Clone)]
struct SharedCounter {
    slice: MemorySlice,
}

impl SharedCounter {
    fn new(slice: MemorySlice) -> Result<Self> {
        let aligned = slice.as_ptr() as usize % std::mem::align_of::<AtomicU64>() == 0;
        if slice.len() != COUNTER_SIZE_BYTES as usize || !aligned {
            return Err(AAudioError::out_of_range(
                "counter region",
                slice.offset() as i64,
            ));
        }
        Ok(Self { slice })
    }

    fn atomic(&self) -> &AtomicU64 {
        // SAFETY: size and alignment checked in `new`, the region is mapped for
        // as long as `slice` holds its handle, and every access goes through
        // this atomic view.
        unsafe { &*(self.slice.as_ptr() as *const AtomicU64) }
    }
}

/// Counters stored in shared memory so both processes see them
#[derive(Debug, Clone)]
pub struct SharedCounters {
    read: SharedCounter,
    write: SharedCounter,
}

impl SharedCounters {
    /// Both slices must be 8 bytes and 8-byte aligned
    pub fn new(read: MemorySlice, write: MemorySlice) -> Result<Self> {
        Ok(Self {
            read: SharedCounter::new(read)?,
            write: SharedCounter::new(write)?,
        })
    }
}

impl FifoCounters for SharedCounters {
    fn read_counter(&self) -> u64 {
        self.read.atomic().load(Ordering::Acquire)
    }

    fn write_counter(&self) -> u64 {
        self.write.atomic().load(Ordering::Acquire)
    }

    fn set_read_counter(&self, value: u64) {
        self.read.atomic().store(value, Ordering::Release);
    }

    fn set_write_counter(&self, value: u64) {
        self.write.atomic().store(value, Ordering::Release);
    }
}

/// Cursor arithmetic over a pair of counters
pub struct FifoController {
    capacity: u32,
    threshold: AtomicU32,
    counters: Box<dyn FifoCounters>,
}

impl FifoController {
    pub fn new(capacity: u32, counters: Box<dyn FifoCounters>) -> Self {
        Self {
            capacity,
            threshold: AtomicU32::new(capacity),
            counters,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u32) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn read_counter(&self) -> u64 {
        self.counters.read_counter()
    }

    pub fn write_counter(&self) -> u64 {
        self.counters.write_counter()
    }

    /// Frames holding data not yet read.
    ///
    /// Clamped to the capacity so a peer scribbling on shared counters cannot
    /// address outside the buffer.
    pub fn full_frames_available(&self) -> u32 {
        let full = self
            .counters
            .write_counter()
            .wrapping_sub(self.counters.read_counter());
        full.min(self.capacity as u64) as u32
    }

    pub fn empty_frames_available(&self) -> u32 {
        self.capacity - self.full_frames_available()
    }

    /// Position in the backing array of the next read
    pub fn read_index(&self) -> u32 {
        (self.counters.read_counter() % self.capacity as u64) as u32
    }

    /// Position in the backing array of the next write
    pub fn write_index(&self) -> u32 {
        (self.counters.write_counter() % self.capacity as u64) as u32
    }

    /// Caller guarantees `frames` does not exceed what was just available
    pub fn advance_read_index(&self, frames: u32) {
        let counter = self.counters.read_counter();
        self.counters
            .set_read_counter(counter.wrapping_add(frames as u64));
    }

    /// Caller guarantees `frames` does not exceed the empty room just measured
    pub fn advance_write_index(&self, frames: u32) {
        let counter = self.counters.write_counter();
        self.counters
            .set_write_counter(counter.wrapping_add(frames as u64));
    }

    pub fn set_read_counter(&self, value: u64) {
        self.counters.set_read_counter(value);
    }

    pub fn set_write_counter(&self, value: u64) {
        self.counters.set_write_counter(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::SharedMemory;

    #[test]
    fn test_available_counts() {
        let fifo = FifoController::new(10, Box::new(LocalCounters::new()));
        assert_eq!(fifo.full_frames_available(), 0);
        assert_eq!(fifo.empty_frames_available(), 10);

        fifo.advance_write_index(7);
        fifo.advance_read_index(3);
        assert_eq!(fifo.full_frames_available(), 4);
        assert_eq!(fifo.empty_frames_available(), 6);
        assert_eq!(fifo.read_index(), 3);
        assert_eq!(fifo.write_index(), 7);

        fifo.advance_write_index(6);
        assert_eq!(fifo.write_index(), 3);
        assert_eq!(fifo.write_counter(), 13);
    }

    #[test]
    fn test_counters_wrap_past_u64_max() {
        let fifo = FifoController::new(8, Box::new(LocalCounters::new()));
        fifo.set_read_counter(u64::MAX - 1);
        fifo.set_write_counter(u64::MAX - 1);
        fifo.advance_write_index(5);
        assert_eq!(fifo.full_frames_available(), 5);
        fifo.advance_read_index(5);
        assert_eq!(fifo.full_frames_available(), 0);
    }

    #[test]
    fn test_corrupt_counters_clamped() {
        let fifo = FifoController::new(8, Box::new(LocalCounters::new()));
        fifo.set_write_counter(1000);
        assert_eq!(fifo.full_frames_available(), 8);
        assert_eq!(fifo.empty_frames_available(), 0);
    }

    #[test]
    fn test_shared_counters_visible_through_region() {
        let memory = SharedMemory::create("counters", 64).unwrap();
        let writer = SharedCounters::new(
            memory.slice(0, 8).unwrap(),
            memory.slice(8, 8).unwrap(),
        )
        .unwrap();
        let reader = SharedCounters::new(
            memory.slice(0, 8).unwrap(),
            memory.slice(8, 8).unwrap(),
        )
        .unwrap();

        writer.set_write_counter(42);
        assert_eq!(reader.write_counter(), 42);
        assert_eq!(reader.read_counter(), 0);
    }

    #[test]
    fn test_shared_counter_alignment() {
        let memory = SharedMemory::create("misaligned", 64).unwrap();
        assert!(SharedCounters::new(memory.slice(4, 8).unwrap(), memory.slice(8, 8).unwrap())
            .is_err());
        assert!(SharedCounters::new(memory.slice(0, 4).unwrap(), memory.slice(8, 8).unwrap())
            .is_err());
    }
}
