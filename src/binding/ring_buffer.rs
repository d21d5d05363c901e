//! Descriptors for one FIFO living in shared memory

use crate::binding::parcel::Parcel;
use crate::binding::shared_memory::{
    MemorySlice, SharedMemoryParcelable, MAX_MMAP_OFFSET_BYTES, MAX_MMAP_SIZE_BYTES,
};
use crate::binding::MAX_SHARED_MEMORIES;
use crate::error::{AAudioError, Result};

/// Size of one FIFO counter word
pub const COUNTER_SIZE_BYTES: i32 = 8;

/// Largest frame accepted from a peer: 8 channels of 32-bit samples, with room
/// for service message frames
const MAX_BYTES_PER_FRAME: i32 = 64;

/// Queue property flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingBufferFlags(pub u32);

impl RingBufferFlags {
    pub const NONE: Self = Self(0);
    pub const RATE_ISOCHRONOUS: Self = Self(0x0000_0001);
    pub const RATE_ASYNCHRONOUS: Self = Self(0x0000_0002);
    pub const COHERENCY_DMA: Self = Self(0x0000_0004);
    pub const COHERENCY_ATOMIC: Self = Self(0x0000_0008);
    pub const COHERENCY_MEMBAR: Self = Self(0x0000_0010);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RingBufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// `(region index, offset, size)` naming a byte range in one of the endpoint's
/// shared memory regions. A size of zero means "not used".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SharedRegionParcelable {
    shared_memory_index: i32,
    offset_in_bytes: i32,
    size_in_bytes: i32,
}

impl SharedRegionParcelable {
    pub fn new(shared_memory_index: i32, offset_in_bytes: i32, size_in_bytes: i32) -> Self {
        Self {
            shared_memory_index,
            offset_in_bytes,
            size_in_bytes,
        }
    }

    pub fn shared_memory_index(&self) -> i32 {
        self.shared_memory_index
    }

    pub fn offset_in_bytes(&self) -> i32 {
        self.offset_in_bytes
    }

    pub fn size_in_bytes(&self) -> i32 {
        self.size_in_bytes
    }

    pub fn is_used(&self) -> bool {
        self.size_in_bytes > 0
    }

    /// Whether both regions are used and share bytes of the same memory
    pub fn overlaps(&self, other: &Self) -> bool {
        if !self.is_used() || !other.is_used() || self.shared_memory_index != other.shared_memory_index
        {
            return false;
        }
        let end = self.offset_in_bytes as i64 + self.size_in_bytes as i64;
        let other_end = other.offset_in_bytes as i64 + other.size_in_bytes as i64;
        (self.offset_in_bytes as i64) < other_end && (other.offset_in_bytes as i64) < end
    }

    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.shared_memory_index);
        parcel.write_i32(self.offset_in_bytes);
        parcel.write_i32(self.size_in_bytes);
    }

    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        Ok(Self {
            shared_memory_index: parcel.read_i32()?,
            offset_in_bytes: parcel.read_i32()?,
            size_in_bytes: parcel.read_i32()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_in_bytes < 0 || self.size_in_bytes >= MAX_MMAP_SIZE_BYTES {
            return Err(AAudioError::out_of_range("region size", self.size_in_bytes));
        }
        if self.size_in_bytes > 0 {
            if self.offset_in_bytes < 0 || self.offset_in_bytes >= MAX_MMAP_OFFSET_BYTES {
                return Err(AAudioError::out_of_range(
                    "region offset",
                    self.offset_in_bytes,
                ));
            }
            if self.shared_memory_index < 0
                || self.shared_memory_index as usize >= MAX_SHARED_MEMORIES
            {
                return Err(AAudioError::out_of_range(
                    "shared memory index",
                    self.shared_memory_index,
                ));
            }
        }
        Ok(())
    }

    /// Look the region up in `memories` and bounds-check it
    pub fn resolve(&self, memories: &[SharedMemoryParcelable]) -> Result<Option<MemorySlice>> {
        if !self.is_used() {
            return Ok(None);
        }
        let memory = usize::try_from(self.shared_memory_index)
            .ok()
            .and_then(|i| memories.get(i))
            .ok_or_else(|| {
                AAudioError::internal(format!(
                    "shared memory index {} with {} regions",
                    self.shared_memory_index,
                    memories.len()
                ))
            })?;
        memory
            .resolve(self.offset_in_bytes, self.size_in_bytes)
            .map(Some)
    }
}

/// Transport form of one FIFO: data region plus its two counter words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingBufferParcelable {
    read_counter: SharedRegionParcelable,
    write_counter: SharedRegionParcelable,
    data: SharedRegionParcelable,
    bytes_per_frame: i32,
    frames_per_burst: i32,
    capacity_in_frames: i32,
    flags: RingBufferFlags,
}

impl RingBufferParcelable {
    /// Describe a FIFO laid out as `[read counter][write counter]...[data]`
    /// inside one region
    pub fn setup_memory(
        &mut self,
        shared_memory_index: i32,
        data_offset_in_bytes: i32,
        read_counter_offset: i32,
        write_counter_offset: i32,
        bytes_per_frame: i32,
        capacity_in_frames: i32,
    ) {
        self.read_counter =
            SharedRegionParcelable::new(shared_memory_index, read_counter_offset, COUNTER_SIZE_BYTES);
        self.write_counter = SharedRegionParcelable::new(
            shared_memory_index,
            write_counter_offset,
            COUNTER_SIZE_BYTES,
        );
        self.data = SharedRegionParcelable::new(
            shared_memory_index,
            data_offset_in_bytes,
            bytes_per_frame * capacity_in_frames,
        );
        self.bytes_per_frame = bytes_per_frame;
        self.capacity_in_frames = capacity_in_frames;
    }

    pub fn set_frames_per_burst(&mut self, frames_per_burst: i32) {
        self.frames_per_burst = frames_per_burst;
    }

    pub fn set_flags(&mut self, flags: RingBufferFlags) {
        self.flags = flags;
    }

    pub fn bytes_per_frame(&self) -> i32 {
        self.bytes_per_frame
    }

    pub fn frames_per_burst(&self) -> i32 {
        self.frames_per_burst
    }

    pub fn capacity_in_frames(&self) -> i32 {
        self.capacity_in_frames
    }

    pub fn flags(&self) -> RingBufferFlags {
        self.flags
    }

    pub fn data(&self) -> &SharedRegionParcelable {
        &self.data
    }

    pub fn is_used(&self) -> bool {
        self.capacity_in_frames > 0
    }

    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.capacity_in_frames);
        if self.capacity_in_frames > 0 {
            parcel.write_i32(self.bytes_per_frame);
            parcel.write_i32(self.frames_per_burst);
            parcel.write_u32(self.flags.0);
            self.read_counter.write_to_parcel(parcel);
            self.write_counter.write_to_parcel(parcel);
            self.data.write_to_parcel(parcel);
        }
    }

    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let capacity_in_frames = parcel.read_i32()?;
        if capacity_in_frames <= 0 {
            return Ok(Self {
                capacity_in_frames,
                ..Self::default()
            });
        }
        Ok(Self {
            capacity_in_frames,
            bytes_per_frame: parcel.read_i32()?,
            frames_per_burst: parcel.read_i32()?,
            flags: RingBufferFlags(parcel.read_u32()?),
            read_counter: SharedRegionParcelable::read_from_parcel(parcel)?,
            write_counter: SharedRegionParcelable::read_from_parcel(parcel)?,
            data: SharedRegionParcelable::read_from_parcel(parcel)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity_in_frames < 0 || self.capacity_in_frames >= MAX_MMAP_SIZE_BYTES {
            return Err(AAudioError::out_of_range(
                "capacity in frames",
                self.capacity_in_frames,
            ));
        }
        if !self.is_used() {
            return Ok(());
        }
        if self.bytes_per_frame <= 0 || self.bytes_per_frame > MAX_BYTES_PER_FRAME {
            return Err(AAudioError::out_of_range(
                "bytes per frame",
                self.bytes_per_frame,
            ));
        }
        if self.frames_per_burst < 0 || self.frames_per_burst > self.capacity_in_frames {
            return Err(AAudioError::out_of_range(
                "frames per burst",
                self.frames_per_burst,
            ));
        }
        let data_bytes = self.bytes_per_frame as i64 * self.capacity_in_frames as i64;
        if (self.data.size_in_bytes() as i64) < data_bytes {
            return Err(AAudioError::out_of_range(
                "data region size",
                self.data.size_in_bytes(),
            ));
        }
        for counter in [&self.read_counter, &self.write_counter] {
            if counter.is_used()
                && (counter.size_in_bytes() != COUNTER_SIZE_BYTES
                    || counter.offset_in_bytes() % COUNTER_SIZE_BYTES != 0)
            {
                return Err(AAudioError::out_of_range(
                    "counter region",
                    counter.offset_in_bytes(),
                ));
            }
        }
        // The counters are atomics; frame copies must never touch them.
        if self.read_counter.overlaps(&self.data) || self.read_counter.overlaps(&self.write_counter) {
            return Err(AAudioError::out_of_range(
                "read counter overlap",
                self.read_counter.offset_in_bytes(),
            ));
        }
        if self.write_counter.overlaps(&self.data) {
            return Err(AAudioError::out_of_range(
                "write counter overlap",
                self.write_counter.offset_in_bytes(),
            ));
        }
        self.read_counter.validate()?;
        self.write_counter.validate()?;
        self.data.validate()
    }

    /// Produce an addressable descriptor; `None` when the queue is unused
    pub fn resolve(
        &self,
        memories: &[SharedMemoryParcelable],
    ) -> Result<Option<RingBufferDescriptor>> {
        if !self.is_used() {
            return Ok(None);
        }
        let data = self
            .data
            .resolve(memories)?
            .ok_or_else(|| AAudioError::internal("ring buffer without a data region"))?;
        Ok(Some(RingBufferDescriptor {
            data,
            read_counter: self.read_counter.resolve(memories)?,
            write_counter: self.write_counter.resolve(memories)?,
            bytes_per_frame: self.bytes_per_frame as u32,
            frames_per_burst: self.frames_per_burst as u32,
            capacity_in_frames: self.capacity_in_frames as u32,
            flags: self.flags,
        }))
    }
}

/// A resolved FIFO description, ready to build a `FifoBuffer` on
#[derive(Debug, Clone)]
pub struct RingBufferDescriptor {
    pub data: MemorySlice,
    pub read_counter: Option<MemorySlice>,
    pub write_counter: Option<MemorySlice>,
    pub bytes_per_frame: u32,
    pub frames_per_burst: u32,
    pub capacity_in_frames: u32,
    pub flags: RingBufferFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::shared_memory::SharedMemory;

    fn queue(capacity: i32) -> RingBufferParcelable {
        let mut parcelable = RingBufferParcelable::default();
        parcelable.setup_memory(0, 64, 0, 8, 8, capacity);
        parcelable.set_frames_per_burst(16);
        parcelable
    }

    #[test]
    fn test_unused_queue() {
        let parcelable = RingBufferParcelable::default();
        assert!(!parcelable.is_used());
        assert!(parcelable.validate().is_ok());
        assert!(parcelable.resolve(&[]).unwrap().is_none());
    }

    #[test]
    fn test_validate_counter_alignment() {
        let mut parcelable = queue(64);
        assert!(parcelable.validate().is_ok());
        parcelable.setup_memory(0, 64, 4, 8, 8, 64);
        assert!(parcelable.validate().is_err());
    }

    #[test]
    fn test_validate_counter_overlapping_data() {
        let mut parcelable = queue(64);
        parcelable.setup_memory(0, 64, 0, 128, 8, 64);
        assert!(matches!(
            parcelable.validate(),
            Err(AAudioError::OutOfRange { field: "write counter overlap", .. })
        ));

        parcelable.setup_memory(0, 0, 504, 512, 8, 64);
        assert!(matches!(
            parcelable.validate(),
            Err(AAudioError::OutOfRange { field: "read counter overlap", .. })
        ));

        parcelable.setup_memory(0, 64, 8, 8, 8, 64);
        assert!(parcelable.validate().is_err());

        // Directly after the data is fine.
        parcelable.setup_memory(0, 0, 512, 520, 8, 64);
        assert!(parcelable.validate().is_ok());
    }

    #[test]
    fn test_validate_burst_larger_than_capacity() {
        let mut parcelable = queue(8);
        parcelable.set_frames_per_burst(16);
        assert!(matches!(
            parcelable.validate(),
            Err(AAudioError::OutOfRange { field: "frames per burst", .. })
        ));
    }

    #[test]
    fn test_resolve_against_region() {
        let memory = SharedMemory::create("queue", 64 + 8 * 64).unwrap();
        let memories = [SharedMemoryParcelable::new(memory, 64 + 8 * 64)];
        let descriptor = queue(64).resolve(&memories).unwrap().unwrap();
        assert_eq!(descriptor.data.len(), 8 * 64);
        assert_eq!(descriptor.write_counter.unwrap().offset(), 8);

        // One frame more no longer fits the declared region.
        assert!(queue(65).resolve(&memories).is_err());
    }

    #[test]
    fn test_resolve_bad_index_is_internal() {
        let region = SharedRegionParcelable::new(2, 0, 8);
        assert!(matches!(region.resolve(&[]), Err(AAudioError::Internal(_))));
    }
}
