//! Cross-process transport: shared regions, queue descriptors and the wire parcel

mod endpoint;
mod message;
mod parcel;
mod ring_buffer;
mod shared_memory;

pub use endpoint::{AudioEndpointParcelable, EndpointDescriptor};
pub use message::{ServiceEvent, ServiceMessage, MESSAGE_BYTES};
pub use parcel::Parcel;
pub use ring_buffer::{
    RingBufferDescriptor, RingBufferFlags, RingBufferParcelable, SharedRegionParcelable,
    COUNTER_SIZE_BYTES,
};
pub use shared_memory::{
    MemorySlice, SharedMemory, SharedMemoryParcelable, MAX_MMAP_OFFSET_BYTES,
    MAX_MMAP_SIZE_BYTES,
};

/// Regions one endpoint descriptor may carry
pub const MAX_SHARED_MEMORIES: usize = 32;
