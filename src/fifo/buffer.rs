//! Lock-free single-producer single-consumer frame FIFO
//!
//! One thread (or process) writes, one reads. Neither side ever blocks:
//! transfers move whatever fits and report the frame count.

use crate::binding::{MemorySlice, RingBufferDescriptor, SharedMemory};
use crate::error::{AAudioError, Result};
use crate::fifo::controller::{FifoController, LocalCounters, SharedCounters};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Up to two contiguous runs of frames inside the backing array.
///
/// The second run is non-empty only when the range wraps past the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrappingBuffer {
    /// Byte offset of each run in the backing array
    pub offsets: [usize; 2],
    /// Frame count of each run
    pub frames: [u32; 2],
}

impl WrappingBuffer {
    pub fn total_frames(&self) -> u32 {
        self.frames[0] + self.frames[1]
    }
}

/// Ring buffer of fixed-size frames
pub struct FifoBuffer {
    bytes_per_frame: u32,
    controller: FifoController,
    storage: MemorySlice,
    owns_storage: bool,
    frames_read: AtomicU64,
    frames_underrun: AtomicU64,
    underrun_count: AtomicU32,
}

impl FifoBuffer {
    /// FIFO with its own storage and process-local counters
    pub fn new(bytes_per_frame: u32, capacity_in_frames: u32) -> Result<Self> {
        check_geometry(bytes_per_frame, capacity_in_frames)?;
        let bytes = bytes_per_frame as usize * capacity_in_frames as usize;
        let memory = SharedMemory::create("fifo", bytes)?;
        let storage = memory.slice(0, bytes)?;
        Ok(Self::assemble(
            bytes_per_frame,
            FifoController::new(capacity_in_frames, Box::new(LocalCounters::new())),
            storage,
            true,
        ))
    }

    /// FIFO over caller-supplied storage and counters, typically shared memory
    pub fn with_shared_storage(
        bytes_per_frame: u32,
        capacity_in_frames: u32,
        counters: SharedCounters,
        storage: MemorySlice,
    ) -> Result<Self> {
        check_geometry(bytes_per_frame, capacity_in_frames)?;
        let needed = bytes_per_frame as usize * capacity_in_frames as usize;
        if storage.len() < needed {
            return Err(AAudioError::out_of_range(
                "fifo storage",
                storage.len() as i64,
            ));
        }
        Ok(Self::assemble(
            bytes_per_frame,
            FifoController::new(capacity_in_frames, Box::new(counters)),
            storage,
            false,
        ))
    }

    /// FIFO over a resolved queue descriptor
    pub fn from_descriptor(descriptor: &RingBufferDescriptor) -> Result<Self> {
        let (read, write) = match (&descriptor.read_counter, &descriptor.write_counter) {
            (Some(read), Some(write)) => (read.clone(), write.clone()),
            _ => return Err(AAudioError::internal("ring buffer without counters")),
        };
        let fifo = Self::with_shared_storage(
            descriptor.bytes_per_frame,
            descriptor.capacity_in_frames,
            SharedCounters::new(read, write)?,
            descriptor.data.clone(),
        )?;
        Ok(fifo)
    }

    fn assemble(
        bytes_per_frame: u32,
        controller: FifoController,
        storage: MemorySlice,
        owns_storage: bool,
    ) -> Self {
        Self {
            bytes_per_frame,
            controller,
            storage,
            owns_storage,
            frames_read: AtomicU64::new(0),
            frames_underrun: AtomicU64::new(0),
            underrun_count: AtomicU32::new(0),
        }
    }

    pub fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_frame
    }

    pub fn capacity(&self) -> u32 {
        self.controller.capacity()
    }

    /// Whether the storage was allocated by this FIFO rather than supplied
    pub fn owns_storage(&self) -> bool {
        self.owns_storage
    }

    pub fn controller(&self) -> &FifoController {
        &self.controller
    }

    pub fn full_frames_available(&self) -> u32 {
        self.controller.full_frames_available()
    }

    pub fn empty_frames_available(&self) -> u32 {
        self.controller.empty_frames_available()
    }

    /// Advisory fill level used by callers for flow control
    pub fn threshold(&self) -> u32 {
        self.controller.threshold()
    }

    pub fn set_threshold(&self, threshold: u32) {
        self.controller.set_threshold(threshold);
    }

    /// Frames delivered by `read_now`
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    /// Frames of silence substituted by `read_now`
    pub fn frames_underrun(&self) -> u64 {
        self.frames_underrun.load(Ordering::Relaxed)
    }

    /// Number of `read_now` calls that came up short
    pub fn underrun_count(&self) -> u32 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    fn split(&self, start_index: u32, frames: u32) -> WrappingBuffer {
        let capacity = self.controller.capacity();
        let bpf = self.bytes_per_frame as usize;
        let mut wrapping = WrappingBuffer {
            offsets: [start_index as usize * bpf, 0],
            frames: [frames, 0],
        };
        if start_index + frames > capacity {
            let first = capacity - start_index;
            wrapping.frames = [first, frames - first];
        }
        wrapping
    }

    /// Runs of frames that hold readable data
    pub fn full_data_available(&self) -> WrappingBuffer {
        let frames = self.controller.full_frames_available();
        self.split(self.controller.read_index(), frames)
    }

    /// Runs of frames free for writing
    pub fn empty_room_available(&self) -> WrappingBuffer {
        let frames = self.controller.empty_frames_available();
        self.split(self.controller.write_index(), frames)
    }

    /// Copy whole frames from `src` into free space.
    ///
    /// Returns the frames written, which is 0 when the FIFO is full. A partial
    /// trailing frame in `src` is ignored.
    pub fn write(&self, src: &[u8]) -> u32 {
        let requested = (src.len() / self.bytes_per_frame as usize) as u32;
        if requested == 0 {
            return 0;
        }
        let room = self.empty_room_available();
        let bpf = self.bytes_per_frame as usize;

        let mut frames_left = requested;
        let mut src_offset = 0;
        for part in 0..2 {
            let frames = frames_left.min(room.frames[part]);
            if frames == 0 {
                break;
            }
            let bytes = frames as usize * bpf;
            self.storage
                .write_at(room.offsets[part], &src[src_offset..src_offset + bytes]);
            src_offset += bytes;
            frames_left -= frames;
        }

        let written = requested - frames_left;
        self.controller.advance_write_index(written);
        written
    }

    /// Copy up to `dst.len() / bytes_per_frame` frames out of the FIFO.
    ///
    /// Returns the frames read; bytes of `dst` beyond them are left untouched.
    pub fn read(&self, dst: &mut [u8]) -> u32 {
        let requested = (dst.len() / self.bytes_per_frame as usize) as u32;
        if requested == 0 {
            return 0;
        }
        let data = self.full_data_available();
        let bpf = self.bytes_per_frame as usize;

        let mut frames_left = requested;
        let mut dst_offset = 0;
        for part in 0..2 {
            let frames = frames_left.min(data.frames[part]);
            if frames == 0 {
                break;
            }
            let bytes = frames as usize * bpf;
            self.storage
                .read_at(data.offsets[part], &mut dst[dst_offset..dst_offset + bytes]);
            dst_offset += bytes;
            frames_left -= frames;
        }

        let read = requested - frames_left;
        self.controller.advance_read_index(read);
        read
    }

    /// Read for the audio callback: never blocks and always fills `dst`.
    ///
    /// Frames the FIFO could not supply are zeroed and counted as underrun.
    pub fn read_now(&self, dst: &mut [u8]) -> u32 {
        let bpf = self.bytes_per_frame as usize;
        let requested = (dst.len() / bpf) as u32;
        let read = self.read(dst);
        let shortfall = requested - read;

        self.frames_read.fetch_add(read as u64, Ordering::Relaxed);
        if shortfall > 0 {
            self.frames_underrun
                .fetch_add(shortfall as u64, Ordering::Relaxed);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
            dst[read as usize * bpf..requested as usize * bpf].fill(0);
        }
        read
    }

    /// Zero the whole backing store. Not for use while either side is active.
    pub fn erase_memory(&mut self) {
        let bytes = self.bytes_per_frame as usize * self.capacity() as usize;
        self.storage.zero(0, bytes);
    }
}

fn check_geometry(bytes_per_frame: u32, capacity_in_frames: u32) -> Result<()> {
    if bytes_per_frame == 0 {
        return Err(AAudioError::out_of_range("bytes per frame", 0));
    }
    if capacity_in_frames == 0 {
        return Err(AAudioError::out_of_range("capacity in frames", 0));
    }
    Ok(())
}
