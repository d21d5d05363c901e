//! Client view of a shared stream: FIFOs built over a received descriptor

use crate::binding::{
    AudioEndpointParcelable, EndpointDescriptor, Parcel, ServiceEvent, ServiceMessage,
    MESSAGE_BYTES,
};
use crate::error::{AAudioError, Result};
use crate::fifo::FifoBuffer;
use crate::stream::Direction;
use crate::sync::Timestamp;
use tracing::{debug, warn};

/// Client end of one stream's shared queues
pub struct ClientEndpoint {
    direction: Direction,
    parcelable: AudioEndpointParcelable,
    data: FifoBuffer,
    frames_per_burst: u32,
    messages: Option<FifoBuffer>,
    last_timestamp: Option<Timestamp>,
    disconnected: bool,
}

impl ClientEndpoint {
    /// Read a descriptor off the wire and map it
    pub fn connect(parcel: &mut Parcel, direction: Direction) -> Result<Self> {
        let parcelable = AudioEndpointParcelable::read_from_parcel(parcel)?;
        Self::new(parcelable, direction)
    }

    /// Validate and resolve `parcelable`, then build FIFOs over its regions
    pub fn new(parcelable: AudioEndpointParcelable, direction: Direction) -> Result<Self> {
        parcelable.validate()?;
        let mut descriptor = EndpointDescriptor::default();
        parcelable.resolve(&mut descriptor)?;

        let data_queue = if direction == Direction::INPUT {
            descriptor.up_data_queue
        } else {
            descriptor.down_data_queue
        }
        .ok_or_else(|| AAudioError::internal(format!("no {} data queue", direction)))?;

        let data = FifoBuffer::from_descriptor(&data_queue)?;
        let messages = descriptor
            .up_message_queue
            .as_ref()
            .map(FifoBuffer::from_descriptor)
            .transpose()?;

        debug!(
            "Client endpoint mapped: {} capacity {} burst {}",
            direction,
            data.capacity(),
            data_queue.frames_per_burst
        );

        Ok(Self {
            direction,
            parcelable,
            data,
            frames_per_burst: data_queue.frames_per_burst,
            messages,
            last_timestamp: None,
            disconnected: false,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst
    }

    pub fn bytes_per_frame(&self) -> u32 {
        self.data.bytes_per_frame()
    }

    pub fn buffer_capacity(&self) -> u32 {
        self.data.capacity()
    }

    /// Frames queued and not yet consumed by the other side
    pub fn full_frames_available(&self) -> u32 {
        self.data.full_frames_available()
    }

    pub fn empty_frames_available(&self) -> u32 {
        self.data.empty_frames_available()
    }

    /// Queue output frames; never blocks
    pub fn write(&self, frames: &[u8]) -> Result<u32> {
        if self.direction != Direction::OUTPUT {
            return Err(AAudioError::invalid_state("write on an input stream"));
        }
        if self.disconnected {
            return Err(AAudioError::Disconnected);
        }
        Ok(self.data.write(frames))
    }

    /// Take captured frames; never blocks
    pub fn read(&self, frames: &mut [u8]) -> Result<u32> {
        if self.direction != Direction::INPUT {
            return Err(AAudioError::invalid_state("read on an output stream"));
        }
        if self.disconnected {
            return Err(AAudioError::Disconnected);
        }
        Ok(self.data.read(frames))
    }

    /// Next message from the service, if any
    pub fn poll_message(&mut self) -> Result<Option<ServiceMessage>> {
        let Some(messages) = &self.messages else {
            return Ok(None);
        };
        let mut frame = [0u8; MESSAGE_BYTES];
        if messages.read(&mut frame) == 0 {
            return Ok(None);
        }
        let message = ServiceMessage::decode(&frame)?;
        match message {
            ServiceMessage::Timestamp { position, nanos } => {
                self.last_timestamp = Some(Timestamp::new(position, nanos));
            }
            ServiceMessage::Event {
                event: ServiceEvent::Disconnected,
                ..
            } => {
                warn!("Service reported the stream disconnected");
                self.disconnected = true;
            }
            ServiceMessage::Event { .. } => {}
        }
        Ok(Some(message))
    }

    /// Drain pending messages, returning how many were handled
    pub fn process_messages(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.poll_message()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Last free-running position reported by the service
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Release the shared region handles
    pub fn close(&mut self) -> Result<()> {
        self.parcelable.close()
    }
}
