//! Endpoint descriptor: the set of shared regions and queues handed to a client

use crate::binding::parcel::Parcel;
use crate::binding::ring_buffer::{RingBufferDescriptor, RingBufferParcelable};
use crate::binding::shared_memory::{SharedMemory, SharedMemoryParcelable};
use crate::binding::MAX_SHARED_MEMORIES;
use crate::error::{AAudioError, Result};
use tracing::{debug, warn};

/// Everything a client needs to reach a stream's shared memory.
///
/// Wire order: region count, each region (size, handle), then the up-message,
/// down-message, up-data and down-data queues.
#[derive(Debug, Clone, Default)]
pub struct AudioEndpointParcelable {
    shared_memories: Vec<SharedMemoryParcelable>,
    pub up_message_queue: RingBufferParcelable,
    pub down_message_queue: RingBufferParcelable,
    pub up_data_queue: RingBufferParcelable,
    pub down_data_queue: RingBufferParcelable,
}

/// Resolved queues, addressable in this process
#[derive(Debug, Clone, Default)]
pub struct EndpointDescriptor {
    pub up_message_queue: Option<RingBufferDescriptor>,
    pub down_message_queue: Option<RingBufferDescriptor>,
    pub up_data_queue: Option<RingBufferDescriptor>,
    pub down_data_queue: Option<RingBufferDescriptor>,
}

impl AudioEndpointParcelable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a region, returning its index for queue descriptors
    pub fn add_region(&mut self, memory: SharedMemory, size_in_bytes: i32) -> Result<i32> {
        if self.shared_memories.len() >= MAX_SHARED_MEMORIES {
            return Err(AAudioError::out_of_range(
                "shared memory count",
                self.shared_memories.len() as i64 + 1,
            ));
        }
        let index = self.shared_memories.len() as i32;
        self.shared_memories
            .push(SharedMemoryParcelable::new(memory, size_in_bytes));
        Ok(index)
    }

    pub fn region_count(&self) -> usize {
        self.shared_memories.len()
    }

    pub fn regions(&self) -> &[SharedMemoryParcelable] {
        &self.shared_memories
    }

    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.shared_memories.len() as i32);
        for memory in &self.shared_memories {
            memory.write_to_parcel(parcel);
        }
        self.up_message_queue.write_to_parcel(parcel);
        self.down_message_queue.write_to_parcel(parcel);
        self.up_data_queue.write_to_parcel(parcel);
        self.down_data_queue.write_to_parcel(parcel);
    }

    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let count = parcel.read_i32()?;
        if count < 0 || count as usize > MAX_SHARED_MEMORIES {
            return Err(AAudioError::internal(format!(
                "received {} shared memory regions",
                count
            )));
        }
        let shared_memories = (0..count)
            .map(|_| SharedMemoryParcelable::read_from_parcel(parcel))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            shared_memories,
            up_message_queue: RingBufferParcelable::read_from_parcel(parcel)?,
            down_message_queue: RingBufferParcelable::read_from_parcel(parcel)?,
            up_data_queue: RingBufferParcelable::read_from_parcel(parcel)?,
            down_data_queue: RingBufferParcelable::read_from_parcel(parcel)?,
        })
    }

    /// Structural checks before trusting a descriptor received from a peer
    pub fn validate(&self) -> Result<()> {
        if self.shared_memories.len() > MAX_SHARED_MEMORIES {
            return Err(AAudioError::internal(format!(
                "{} shared memory regions",
                self.shared_memories.len()
            )));
        }
        for (index, memory) in self.shared_memories.iter().enumerate() {
            memory.validate().map_err(|e| {
                warn!("Shared memory region {} invalid: {}", index, e);
                e
            })?;
        }
        for (name, queue) in self.queues() {
            queue.validate().map_err(|e| {
                warn!("{} invalid: {}", name, e);
                e
            })?;
        }
        Ok(())
    }

    /// Resolve every queue into `descriptor`.
    ///
    /// Stops at the first queue that fails; queues before it stay populated.
    pub fn resolve(&self, descriptor: &mut EndpointDescriptor) -> Result<()> {
        descriptor.up_message_queue = self.up_message_queue.resolve(&self.shared_memories)?;
        descriptor.down_message_queue = self.down_message_queue.resolve(&self.shared_memories)?;
        descriptor.up_data_queue = self.up_data_queue.resolve(&self.shared_memories)?;
        descriptor.down_data_queue = self.down_data_queue.resolve(&self.shared_memories)?;
        Ok(())
    }

    /// Release every region handle, reporting the first failure
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for (index, memory) in self.shared_memories.iter_mut().enumerate() {
            if let Err(e) = memory.close() {
                debug!("Closing shared memory region {} failed: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn queues(&self) -> [(&'static str, &RingBufferParcelable); 4] {
        [
            ("up message queue", &self.up_message_queue),
            ("down message queue", &self.down_message_queue),
            ("up data queue", &self.up_data_queue),
            ("down data queue", &self.down_data_queue),
        ]
    }
}
