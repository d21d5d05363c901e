//! Server-side session for one client of a shared endpoint

use crate::binding::{
    AudioEndpointParcelable, RingBufferFlags, RingBufferParcelable, ServiceEvent,
    ServiceMessage, SharedMemory, COUNTER_SIZE_BYTES, MAX_MMAP_SIZE_BYTES, MESSAGE_BYTES,
};
use crate::device::ClientHandle;
use crate::error::{AAudioError, Result};
use crate::fifo::{FifoBuffer, SharedCounters};
use crate::service::endpoint_shared::SharedEndpoint;
use crate::stream::{AudioClient, AudioFormat, Direction, SharingMode, StreamParameters, StreamRequest};
use crate::sync::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_BURSTS_PER_BUFFER: i32 = 16;
pub const MIN_BURSTS_PER_BUFFER: i32 = 2;
pub const MAX_FRAMES_PER_BUFFER: i32 = 32 * 1024;

/// Messages the up-message queue holds
const MESSAGE_QUEUE_CAPACITY: i32 = 32;

/// Counters sit at the front of each region, data starts on its own cache line
const READ_COUNTER_OFFSET: i32 = 0;
const WRITE_COUNTER_OFFSET: i32 = COUNTER_SIZE_BYTES;
const DATA_OFFSET: i32 = 64;

/// Client streams always exchange float samples with the service
const CLIENT_BYTES_PER_SAMPLE: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Started,
    Stopped,
    Disconnected,
    Closed,
}

/// Pick the data queue capacity for a client request.
///
/// `0` means a default of 16 bursts. Anything else is rounded up to whole
/// bursts and to at least 2 bursts.
pub fn calculate_buffer_capacity(requested: i32, frames_per_burst: i32) -> Result<i32> {
    if frames_per_burst <= 0 {
        return Err(AAudioError::internal(format!(
            "frames per burst {}",
            frames_per_burst
        )));
    }
    if requested < 0 {
        return Err(AAudioError::out_of_range("buffer capacity", requested));
    }
    if requested == 0 {
        let max_bursts = (MAX_FRAMES_PER_BUFFER / frames_per_burst).max(1);
        return Ok(DEFAULT_BURSTS_PER_BUFFER.min(max_bursts) * frames_per_burst);
    }
    let bursts = ((requested as i64 + frames_per_burst as i64 - 1) / frames_per_burst as i64)
        .max(MIN_BURSTS_PER_BUFFER as i64);
    let capacity = bursts * frames_per_burst as i64;
    if capacity > MAX_FRAMES_PER_BUFFER as i64 {
        return Err(AAudioError::out_of_range("buffer capacity", requested));
    }
    Ok(capacity as i32)
}

/// One client's stream on a shared endpoint
pub struct SharedStream {
    endpoint: Arc<SharedEndpoint>,
    client: AudioClient,
    parameters: StreamParameters,
    frames_per_burst: i32,
    data_memory: SharedMemory,
    message_memory: SharedMemory,
    data_fifo: FifoBuffer,
    // The control path and the callback thread both post messages.
    message_fifo: Mutex<FifoBuffer>,
    state: Mutex<StreamState>,
    client_handle: Mutex<Option<ClientHandle>>,
    running: AtomicBool,
    disconnected: AtomicBool,
    overrun_frames: AtomicU64,
    dropped_messages: AtomicU64,
}

impl SharedStream {
    /// Validate `request` against the endpoint, allocate the shared queues and
    /// register with the endpoint
    pub fn open(endpoint: Arc<SharedEndpoint>, request: &StreamRequest) -> Result<Arc<Self>> {
        let requested = request.parameters();
        requested.validate()?;

        if requested.sharing_mode() != SharingMode::SHARED {
            return Err(AAudioError::illegal_argument(
                "sharing mode",
                requested.sharing_mode().0,
            ));
        }
        if requested.direction() != endpoint.direction() {
            return Err(AAudioError::illegal_argument(
                "direction",
                requested.direction().0,
            ));
        }

        let channels = match requested.samples_per_frame() {
            0 => endpoint.samples_per_frame(),
            n if n == endpoint.samples_per_frame() => n,
            n => return Err(AAudioError::out_of_range("samples per frame", n)),
        };
        let sample_rate = match requested.sample_rate() {
            0 => endpoint.sample_rate(),
            r if r == endpoint.sample_rate() => r,
            r => return Err(AAudioError::out_of_range("sample rate", r)),
        };
        match requested.format() {
            AudioFormat::UNSPECIFIED | AudioFormat::PCM_FLOAT => {}
            other => return Err(AAudioError::InvalidFormat(other.0)),
        }

        let frames_per_burst = endpoint.frames_per_burst();
        let capacity = calculate_buffer_capacity(requested.buffer_capacity(), frames_per_burst)?;
        let bytes_per_frame = channels * CLIENT_BYTES_PER_SAMPLE;

        let data_bytes = DATA_OFFSET as i64 + capacity as i64 * bytes_per_frame as i64;
        if data_bytes >= MAX_MMAP_SIZE_BYTES as i64 {
            return Err(AAudioError::out_of_range(
                "buffer capacity",
                requested.buffer_capacity(),
            ));
        }
        let data_memory = SharedMemory::create("stream-data", data_bytes as usize)?;
        let data_fifo = fifo_in(&data_memory, bytes_per_frame, capacity)?;

        let message_bytes = DATA_OFFSET + MESSAGE_QUEUE_CAPACITY * MESSAGE_BYTES as i32;
        let message_memory = SharedMemory::create("stream-messages", message_bytes as usize)?;
        let message_fifo = fifo_in(&message_memory, MESSAGE_BYTES as i32, MESSAGE_QUEUE_CAPACITY)?;

        let mut parameters = StreamParameters::new();
        parameters
            .set_device_id(endpoint.device_id())
            .set_sample_rate(sample_rate)
            .set_samples_per_frame(channels)
            .set_sharing_mode(SharingMode::SHARED)
            .set_format(AudioFormat::PCM_FLOAT)
            .set_direction(endpoint.direction())
            .set_buffer_capacity(capacity);

        let stream = Arc::new(Self {
            endpoint: endpoint.clone(),
            client: request.client().clone(),
            parameters,
            frames_per_burst,
            data_memory,
            message_memory,
            data_fifo,
            message_fifo: Mutex::new(message_fifo),
            state: Mutex::new(StreamState::Open),
            client_handle: Mutex::new(None),
            running: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            overrun_frames: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
        });
        endpoint.register_stream(&stream);

        info!(
            "Shared stream opened for pid {}: {} capacity {} frames",
            stream.client.pid, stream.parameters, capacity
        );
        Ok(stream)
    }

    /// Negotiated configuration reported back to the client
    pub fn parameters(&self) -> &StreamParameters {
        &self.parameters
    }

    pub fn client(&self) -> &AudioClient {
        &self.client
    }

    pub fn endpoint(&self) -> &Arc<SharedEndpoint> {
        &self.endpoint
    }

    pub fn state(&self) -> StreamState {
        let state = *self.state.lock();
        if state != StreamState::Closed && self.disconnected.load(Ordering::Acquire) {
            StreamState::Disconnected
        } else {
            state
        }
    }

    /// Whether the callback thread should service this stream
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Service side of the data queue
    pub fn data_fifo(&self) -> &FifoBuffer {
        &self.data_fifo
    }

    /// Input frames dropped because the client did not keep up
    pub fn overrun_frames(&self) -> u64 {
        self.overrun_frames.load(Ordering::Relaxed)
    }

    /// Output frames replaced with silence because the client did not keep up
    pub fn underrun_frames(&self) -> u64 {
        self.data_fifo.frames_underrun()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Descriptor the client maps to reach this stream's queues
    pub fn endpoint_parcelable(&self) -> Result<AudioEndpointParcelable> {
        let mut parcelable = AudioEndpointParcelable::new();
        let data_index =
            parcelable.add_region(self.data_memory.clone(), self.data_memory.len() as i32)?;
        let message_index =
            parcelable.add_region(self.message_memory.clone(), self.message_memory.len() as i32)?;

        let mut messages = RingBufferParcelable::default();
        messages.setup_memory(
            message_index,
            DATA_OFFSET,
            READ_COUNTER_OFFSET,
            WRITE_COUNTER_OFFSET,
            MESSAGE_BYTES as i32,
            MESSAGE_QUEUE_CAPACITY,
        );
        messages.set_frames_per_burst(1);
        messages.set_flags(RingBufferFlags::RATE_ASYNCHRONOUS | RingBufferFlags::COHERENCY_ATOMIC);
        parcelable.up_message_queue = messages;

        let mut data = RingBufferParcelable::default();
        data.setup_memory(
            data_index,
            DATA_OFFSET,
            READ_COUNTER_OFFSET,
            WRITE_COUNTER_OFFSET,
            self.data_fifo.bytes_per_frame() as i32,
            self.data_fifo.capacity() as i32,
        );
        data.set_frames_per_burst(self.frames_per_burst);
        data.set_flags(RingBufferFlags::RATE_ISOCHRONOUS | RingBufferFlags::COHERENCY_ATOMIC);
        if self.parameters.direction() == Direction::INPUT {
            parcelable.up_data_queue = data;
        } else {
            parcelable.down_data_queue = data;
        }

        Ok(parcelable)
    }

    /// Start the stream on the shared endpoint. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            StreamState::Started => return Ok(()),
            StreamState::Closed => return Err(AAudioError::invalid_state("stream closed")),
            _ if self.disconnected.load(Ordering::Acquire) => {
                return Err(AAudioError::Disconnected)
            }
            _ => {}
        }

        let handle = self.endpoint.start_stream(&self.client)?;
        *self.client_handle.lock() = Some(handle);
        self.running.store(true, Ordering::Release);
        *state = StreamState::Started;
        self.send_event(ServiceEvent::Started, 0);
        debug!("Shared stream for pid {} started", self.client.pid);
        Ok(())
    }

    /// Stop the stream. Safe to call in any state and more than once.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.running.store(false, Ordering::Release);
        // Taken before calling into the endpoint so a repeated stop cannot
        // release the same running reference twice.
        let handle = self.client_handle.lock().take();
        if let Some(handle) = handle {
            self.endpoint.stop_stream(handle);
        }
        if *state == StreamState::Started {
            *state = StreamState::Stopped;
            self.send_event(ServiceEvent::Stopped, 0);
            debug!("Shared stream for pid {} stopped", self.client.pid);
        }
    }

    /// Stop, unregister from the endpoint and tell the client.
    ///
    /// Returns `true` only for the call that closed the stream; later calls
    /// are no-ops returning `false`.
    pub fn close(&self) -> bool {
        self.stop();
        {
            let mut state = self.state.lock();
            if *state == StreamState::Closed {
                return false;
            }
            *state = StreamState::Closed;
        }
        self.endpoint.unregister_stream(self);
        self.send_event(ServiceEvent::Closed, 0);
        info!("Shared stream for pid {} closed", self.client.pid);
        true
    }

    /// Mark the stream disconnected. Called from the callback thread, so it
    /// touches only atomics and the message queue.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            self.running.store(false, Ordering::Release);
            self.send_event(ServiceEvent::Disconnected, 0);
        }
    }

    /// Copy a captured burst into the data queue, counting what does not fit
    pub fn deliver_input(&self, burst: &[u8]) {
        let frames = (burst.len() / self.data_fifo.bytes_per_frame() as usize) as u64;
        let written = self.data_fifo.write(burst) as u64;
        if written < frames {
            self.overrun_frames
                .fetch_add(frames - written, Ordering::Relaxed);
            trace!("Overrun for pid {}: {} frames", self.client.pid, frames - written);
        }
    }

    pub fn send_current_timestamp(&self, timestamp: Timestamp) {
        self.post(ServiceMessage::Timestamp {
            position: timestamp.position,
            nanos: timestamp.nanos,
        });
    }

    fn send_event(&self, event: ServiceEvent, data: i64) {
        self.post(ServiceMessage::Event { event, data });
    }

    fn post(&self, message: ServiceMessage) {
        if self.message_fifo.lock().write(&message.encode()) == 0 {
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            trace!("Message queue full for pid {}", self.client.pid);
        }
    }
}

impl Drop for SharedStream {
    fn drop(&mut self) {
        if *self.state.get_mut() != StreamState::Closed {
            warn!("Shared stream for pid {} dropped without close", self.client.pid);
            self.stop();
        }
    }
}

fn fifo_in(memory: &SharedMemory, bytes_per_frame: i32, capacity: i32) -> Result<FifoBuffer> {
    let counters = SharedCounters::new(
        memory.slice(READ_COUNTER_OFFSET as usize, COUNTER_SIZE_BYTES as usize)?,
        memory.slice(WRITE_COUNTER_OFFSET as usize, COUNTER_SIZE_BYTES as usize)?,
    )?;
    let data_bytes = bytes_per_frame as usize * capacity as usize;
    let storage = memory.slice(DATA_OFFSET as usize, data_bytes)?;
    FifoBuffer::with_shared_storage(bytes_per_frame as u32, capacity as u32, counters, storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDeviceConfig, SimulatedStream};
    use crate::service::endpoint_shared::EndpointConfig;
    use std::time::Duration;

    fn shared_endpoint() -> Arc<SharedEndpoint> {
        let device = Arc::new(SimulatedStream::new(SimulatedDeviceConfig::default()));
        let request = StreamRequest::new(StreamParameters::new(), AudioClient::default());
        Arc::new(SharedEndpoint::open(device, &request, &EndpointConfig::default()).unwrap())
    }

    #[test]
    fn test_dropped_stream_releases_endpoint() {
        let endpoint = shared_endpoint();
        let request = StreamRequest::new(StreamParameters::new(), AudioClient::new(5, 5, "gone"));
        let stream = SharedStream::open(endpoint.clone(), &request).unwrap();
        stream.start().unwrap();
        assert_eq!(endpoint.registered_stream_count(), 1);
        assert_eq!(Arc::strong_count(&endpoint), 2);

        drop(stream);
        // The callback may still hold the session for the burst in flight.
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(endpoint.registered_stream_count(), 0);
        assert_eq!(endpoint.running_stream_count(), 0);
        assert!(!endpoint.is_callback_running());
        assert_eq!(Arc::strong_count(&endpoint), 1);
    }

    #[test]
    fn test_close_reports_first_transition_only() {
        let endpoint = shared_endpoint();
        let request = StreamRequest::new(StreamParameters::new(), AudioClient::default());
        let stream = SharedStream::open(endpoint, &request).unwrap();
        assert!(stream.close());
        assert!(!stream.close());
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_capacity_default_is_sixteen_bursts() {
        assert_eq!(calculate_buffer_capacity(0, 192), Ok(192 * 16));
        assert_eq!(calculate_buffer_capacity(0, 4096), Ok(4096 * 8));
    }

    #[test]
    fn test_capacity_rounds_up_to_bursts() {
        assert_eq!(calculate_buffer_capacity(1, 192), Ok(384));
        assert_eq!(calculate_buffer_capacity(500, 192), Ok(576));
        assert_eq!(calculate_buffer_capacity(576, 192), Ok(576));
    }

    #[test]
    fn test_capacity_limits() {
        assert!(matches!(
            calculate_buffer_capacity(MAX_FRAMES_PER_BUFFER + 1, 192),
            Err(AAudioError::OutOfRange { .. })
        ));
        assert!(matches!(
            calculate_buffer_capacity(100, 0),
            Err(AAudioError::Internal(_))
        ));
    }
}
