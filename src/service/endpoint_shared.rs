//! Shared endpoint: many client streams multiplexed onto one exclusive stream
//!
//! The first client to start wakes the hardware and launches the callback
//! thread; the last one to stop puts both back to sleep. The running count and
//! the hardware state change together under `run`, so two clients racing to be
//! first or last cannot both act on the hardware.

use crate::device::{ClientHandle, ExclusiveStream};
use crate::error::{AAudioError, Result};
use crate::service::mixer::{burst_bytes, decode_samples, encode_samples, AudioMixer};
use crate::service::stream_shared::SharedStream;
use crate::stream::{AudioClient, AudioFormat, Direction, SharingMode, StreamParameters, StreamRequest};
use crate::sync::{frames_to_nanos, monotonic_nanos, AtomicTimestamp, ClockId, Timestamp};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Capacity requested from the exclusive stream regardless of client requests
pub const DEFAULT_BUFFER_CAPACITY: i32 = 48 * 8;

/// Clients get a timestamp message once per this many bursts
const TIMESTAMP_BURSTS: u64 = 8;

/// Tunables for a shared endpoint
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub buffer_capacity_frames: i32,
    /// How long stopping waits for the callback thread before detaching it
    pub join_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            buffer_capacity_frames: DEFAULT_BUFFER_CAPACITY,
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Observable endpoint state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Open with no running clients
    Idle,
    /// Hardware started for at least one client
    Running,
    Disconnected,
    Closed,
}

/// Negotiated hardware configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointProperties {
    pub device_id: i32,
    pub direction: Direction,
    pub sample_rate: i32,
    pub samples_per_frame: i32,
    pub frames_per_burst: i32,
    pub format: AudioFormat,
}

impl EndpointProperties {
    /// Callback period in nanoseconds
    pub fn burst_period_nanos(&self) -> i64 {
        frames_to_nanos(self.frames_per_burst as i64, self.sample_rate)
    }
}

/// State shared between the control path and the callback thread
struct EndpointCore {
    stream: Arc<dyn ExclusiveStream>,
    properties: EndpointProperties,
    // Weak so a session dropped without `close` is freed rather than kept
    // alive by its own endpoint.
    registered: Mutex<Vec<Weak<SharedStream>>>,
    connected: AtomicBool,
    position: AtomicTimestamp,
    frames_transferred: AtomicI64,
}

struct CallbackThread {
    handle: JoinHandle<()>,
    exited: Receiver<()>,
    /// Owned by this launch only; a detached thread keeps its own cleared flag
    enabled: Arc<AtomicBool>,
}

#[derive(Default)]
struct RunState {
    callback: Option<CallbackThread>,
}

/// Server-side endpoint shared by every client of one device and direction
pub struct SharedEndpoint {
    core: Arc<EndpointCore>,
    run: Mutex<RunState>,
    running_stream_count: AtomicI32,
    open: AtomicBool,
    join_timeout: Duration,
}

impl SharedEndpoint {
    /// Open the exclusive stream for `request`'s device and direction.
    ///
    /// The exclusive stream is asked for EXCLUSIVE mode with no fallback and
    /// the configured capacity; what it negotiates becomes the endpoint's
    /// configuration.
    pub fn open(
        stream: Arc<dyn ExclusiveStream>,
        request: &StreamRequest,
        config: &EndpointConfig,
    ) -> Result<Self> {
        let requested = request.parameters();
        let mut parameters = StreamParameters::new();
        parameters
            .set_sharing_mode(SharingMode::EXCLUSIVE)
            .set_device_id(requested.device_id())
            .set_direction(requested.direction())
            .set_format(AudioFormat::PCM_FLOAT)
            .set_buffer_capacity(config.buffer_capacity_frames);

        let mut exclusive_request = StreamRequest::new(parameters, request.client().clone());
        exclusive_request.set_sharing_mode_match_required(true);

        stream.open(&exclusive_request).map_err(|e| {
            warn!(
                "Failed to open exclusive stream for device {}: {}",
                requested.device_id(),
                e
            );
            e
        })?;

        let properties = EndpointProperties {
            device_id: stream.device_id(),
            direction: requested.direction(),
            sample_rate: stream.sample_rate(),
            samples_per_frame: stream.samples_per_frame(),
            frames_per_burst: stream.frames_per_burst(),
            format: stream.format(),
        };
        if properties.frames_per_burst <= 0 || properties.sample_rate <= 0 {
            let _ = stream.close();
            return Err(AAudioError::internal(format!(
                "device reported burst {} at {}Hz",
                properties.frames_per_burst, properties.sample_rate
            )));
        }

        info!(
            "Shared endpoint opened: device {} {} {}Hz {}ch burst {}",
            properties.device_id,
            properties.direction,
            properties.sample_rate,
            properties.samples_per_frame,
            properties.frames_per_burst
        );

        Ok(Self {
            core: Arc::new(EndpointCore {
                stream,
                properties,
                registered: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                position: AtomicTimestamp::new(),
                frames_transferred: AtomicI64::new(0),
            }),
            run: Mutex::new(RunState::default()),
            running_stream_count: AtomicI32::new(0),
            open: AtomicBool::new(true),
            join_timeout: config.join_timeout,
        })
    }

    pub fn properties(&self) -> &EndpointProperties {
        &self.core.properties
    }

    pub fn device_id(&self) -> i32 {
        self.core.properties.device_id
    }

    pub fn direction(&self) -> Direction {
        self.core.properties.direction
    }

    pub fn sample_rate(&self) -> i32 {
        self.core.properties.sample_rate
    }

    pub fn samples_per_frame(&self) -> i32 {
        self.core.properties.samples_per_frame
    }

    pub fn frames_per_burst(&self) -> i32 {
        self.core.properties.frames_per_burst
    }

    pub fn running_stream_count(&self) -> i32 {
        self.running_stream_count.load(Ordering::Acquire)
    }

    /// Registered sessions that are still alive
    pub fn registered_stream_count(&self) -> usize {
        self.core
            .registered
            .lock()
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EndpointState {
        if !self.open.load(Ordering::Acquire) {
            EndpointState::Closed
        } else if !self.is_connected() {
            EndpointState::Disconnected
        } else if self.running_stream_count() > 0 {
            EndpointState::Running
        } else {
            EndpointState::Idle
        }
    }

    /// Whether the callback thread is currently launched
    pub fn is_callback_running(&self) -> bool {
        self.run.lock().callback.is_some()
    }

    /// Whether this endpoint serves `device_id` in `direction`
    pub fn matches(&self, device_id: i32, direction: Direction) -> bool {
        self.core.properties.direction == direction
            && (device_id == 0 || device_id == self.core.properties.device_id)
    }

    /// Start one client.
    ///
    /// The 0→1 transition starts the hardware and the callback thread. On any
    /// failure the count and hardware are restored before returning.
    pub fn start_stream(&self, client: &AudioClient) -> Result<ClientHandle> {
        {
            let mut run = self.run.lock();
            if !self.open.load(Ordering::Acquire) {
                return Err(AAudioError::invalid_state("endpoint closed"));
            }
            if !self.is_connected() {
                return Err(AAudioError::Disconnected);
            }
            let previous = self.running_stream_count.fetch_add(1, Ordering::AcqRel);
            if previous == 0 {
                if let Err(e) = self.start_hardware(&mut run) {
                    self.running_stream_count.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            }
        }

        match self.core.stream.start_client(client) {
            Ok(handle) => {
                debug!(
                    "Client pid {} started on device {} as {}",
                    client.pid, self.core.properties.device_id, handle
                );
                Ok(handle)
            }
            Err(e) => {
                warn!("Failed to register client pid {}: {}", client.pid, e);
                self.release_running_reference();
                Err(e)
            }
        }
    }

    /// Stop one client. Always completes: unregistering is best effort and
    /// the 1→0 transition stops the callback thread and the hardware.
    pub fn stop_stream(&self, handle: ClientHandle) {
        if let Err(e) = self.core.stream.stop_client(handle) {
            debug!("Ignoring stop_client({}) failure: {}", handle, e);
        }
        self.release_running_reference();
    }

    fn release_running_reference(&self) {
        let mut run = self.run.lock();
        if self.running_stream_count.load(Ordering::Acquire) <= 0 {
            warn!(
                "Stop on device {} with no running streams",
                self.core.properties.device_id
            );
            return;
        }
        if self.running_stream_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stop_callback_thread(&mut run);
            if let Err(e) = self.core.stream.request_stop() {
                warn!(
                    "Device {} request_stop failed: {}",
                    self.core.properties.device_id, e
                );
            }
            info!("Shared endpoint {} stopped", self.core.properties.device_id);
        }
    }

    fn start_hardware(&self, run: &mut RunState) -> Result<()> {
        self.core.stream.request_start()?;
        match self.launch_callback_thread() {
            Ok(callback) => {
                run.callback = Some(callback);
                info!(
                    "Shared endpoint {} started, callback period {}ns",
                    self.core.properties.device_id,
                    self.core.properties.burst_period_nanos()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to launch callback thread: {}", e);
                if let Err(stop_error) = self.core.stream.request_stop() {
                    warn!("Rollback request_stop failed: {}", stop_error);
                }
                Err(e)
            }
        }
    }

    fn launch_callback_thread(&self) -> Result<CallbackThread> {
        let core = self.core.clone();
        let (exit_tx, exit_rx) = bounded(1);
        let enabled = Arc::new(AtomicBool::new(true));
        let thread_enabled = enabled.clone();

        let spawned = thread::Builder::new()
            .name(format!("endpoint-{}", self.core.properties.device_id))
            .spawn(move || {
                core.run_callback_loop(&thread_enabled);
                let _ = exit_tx.send(());
            });

        match spawned {
            Ok(handle) => Ok(CallbackThread {
                handle,
                exited: exit_rx,
                enabled,
            }),
            Err(e) => Err(AAudioError::internal(format!("spawn callback thread: {}", e))),
        }
    }

    fn stop_callback_thread(&self, run: &mut RunState) {
        let Some(callback) = run.callback.take() else {
            return;
        };
        callback.enabled.store(false, Ordering::Release);

        // A session released from inside the callback stops its own thread,
        // which exits once the current burst returns.
        if callback.handle.thread().id() == thread::current().id() {
            debug!("Callback thread stopping itself");
            return;
        }

        match callback.exited.recv_timeout(self.join_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Callback thread for device {} did not exit within {:?}, detaching",
                    self.core.properties.device_id, self.join_timeout
                );
            }
            // A disconnected channel means the thread unwound without sending.
            _ => {
                if callback.handle.join().is_err() {
                    error!("Callback thread panicked");
                }
            }
        }
    }

    /// Position and time last published by the callback thread
    pub fn free_running_position(&self) -> Result<Timestamp> {
        self.core
            .position
            .read()
            .ok_or(AAudioError::Unavailable("free running position"))
    }

    /// Timestamp straight from the hardware, on the monotonic clock
    pub fn timestamp(&self) -> Result<Timestamp> {
        self.core.stream.timestamp(ClockId::Monotonic)
    }

    /// Close the exclusive stream. Expected only once no client is running.
    pub fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let count = self.running_stream_count();
        if count > 0 {
            warn!(
                "Closing endpoint {} with {} running streams",
                self.core.properties.device_id, count
            );
        }
        self.stop_callback_thread(&mut self.run.lock());
        info!("Shared endpoint {} closed", self.core.properties.device_id);
        self.core.stream.close()
    }

    pub(crate) fn register_stream(&self, stream: &Arc<SharedStream>) {
        let mut registered = self.core.registered.lock();
        registered.retain(|s| s.strong_count() > 0);
        registered.push(Arc::downgrade(stream));
    }

    pub(crate) fn unregister_stream(&self, stream: &SharedStream) {
        self.core
            .registered
            .lock()
            .retain(|s| s.strong_count() > 0 && !std::ptr::eq(s.as_ptr(), stream));
    }
}

impl Drop for SharedEndpoint {
    fn drop(&mut self) {
        let mut run = self.run.lock();
        self.stop_callback_thread(&mut run);
    }
}

impl EndpointCore {
    /// Live sessions the callback should service, pruning dropped ones
    fn running_streams(&self) -> Vec<Arc<SharedStream>> {
        let mut registered = self.registered.lock();
        registered.retain(|s| s.strong_count() > 0);
        registered
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.is_running())
            .collect()
    }

    fn run_callback_loop(&self, enabled: &AtomicBool) {
        let props = self.properties;
        info!(
            "Callback thread started for device {} ({})",
            props.device_id, props.direction
        );

        let device_bytes = match burst_bytes(props.format, props.samples_per_frame, props.frames_per_burst) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Cannot size device burst: {}", e);
                return;
            }
        };
        let samples = (props.samples_per_frame * props.frames_per_burst) as usize;
        let mut device_buffer = vec![0u8; device_bytes];
        let mut mixer = AudioMixer::new(props.samples_per_frame, props.frames_per_burst);
        let mut input_samples = vec![0.0f32; samples];
        let mut client_bytes = vec![0u8; samples * 4];
        let timeout = Duration::from_nanos(props.burst_period_nanos().max(0) as u64 * 4)
            .max(Duration::from_millis(100));

        let mut bursts: u64 = 0;
        while enabled.load(Ordering::Acquire) && self.stream.is_active() {
            let result = if props.direction == Direction::INPUT {
                self.capture_burst(&mut device_buffer, &mut input_samples, &mut client_bytes, timeout)
            } else {
                self.render_burst(&mut mixer, &mut device_buffer, timeout)
            };

            let frames = match result {
                Ok(frames) if frames == props.frames_per_burst as u32 => frames,
                Ok(frames) => {
                    warn!("Short burst: {} of {} frames", frames, props.frames_per_burst);
                    break;
                }
                Err(AAudioError::Disconnected) => {
                    warn!("Device {} disconnected", props.device_id);
                    self.disconnect_registered_streams();
                    break;
                }
                Err(e) => {
                    error!("Callback I/O failed on device {}: {}", props.device_id, e);
                    break;
                }
            };

            // Stopped while blocked in I/O; a newer thread may own the position now.
            if !enabled.load(Ordering::Acquire) {
                break;
            }

            let position = self.frames_transferred.fetch_add(frames as i64, Ordering::AcqRel)
                + frames as i64;
            let timestamp = Timestamp::new(position, monotonic_nanos());
            self.position.write(timestamp);
            trace!("Burst done, position {}", position);

            bursts += 1;
            if bursts % TIMESTAMP_BURSTS == 0 {
                for stream in self.running_streams() {
                    stream.send_current_timestamp(timestamp);
                }
            }
        }

        info!("Callback thread exiting for device {}", props.device_id);
    }

    fn render_burst(
        &self,
        mixer: &mut AudioMixer,
        device_buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<u32> {
        mixer.clear();
        for stream in self.running_streams() {
            mixer.mix(stream.data_fifo());
        }
        mixer.render(self.properties.format, device_buffer)?;
        self.stream
            .write(device_buffer, self.properties.frames_per_burst as u32, timeout)
    }

    fn capture_burst(
        &self,
        device_buffer: &mut [u8],
        samples: &mut [f32],
        client_bytes: &mut [u8],
        timeout: Duration,
    ) -> Result<u32> {
        let frames = self
            .stream
            .read(device_buffer, self.properties.frames_per_burst as u32, timeout)?;
        decode_samples(device_buffer, self.properties.format, samples)?;
        let bytes = encode_samples(samples, AudioFormat::PCM_FLOAT, client_bytes)?;
        let used = (frames as usize * self.properties.samples_per_frame as usize * 4).min(bytes);
        for stream in self.running_streams() {
            stream.deliver_input(&client_bytes[..used]);
        }
        Ok(frames)
    }

    fn disconnect_registered_streams(&self) {
        self.connected.store(false, Ordering::Release);
        let streams: Vec<_> = self.registered.lock().iter().filter_map(Weak::upgrade).collect();
        for stream in streams {
            stream.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDeviceConfig, SimulatedStream};

    fn request(device_id: i32) -> StreamRequest {
        let mut params = StreamParameters::new();
        params.set_device_id(device_id);
        StreamRequest::new(params, AudioClient::new(100, 1000, "test"))
    }

    fn endpoint() -> (Arc<SimulatedStream>, SharedEndpoint) {
        let device = Arc::new(SimulatedStream::new(SimulatedDeviceConfig {
            device_id: 3,
            ..Default::default()
        }));
        let endpoint =
            SharedEndpoint::open(device.clone(), &request(3), &EndpointConfig::default()).unwrap();
        (device, endpoint)
    }

    #[test]
    fn test_open_copies_hardware_values() {
        let (_device, endpoint) = endpoint();
        assert_eq!(endpoint.device_id(), 3);
        assert_eq!(endpoint.sample_rate(), 48000);
        assert_eq!(endpoint.samples_per_frame(), 2);
        assert_eq!(endpoint.frames_per_burst(), 192);
        assert_eq!(endpoint.properties().burst_period_nanos(), 4_000_000);
        assert_eq!(endpoint.state(), EndpointState::Idle);
    }

    #[test]
    fn test_first_start_and_last_stop_drive_hardware() {
        let (device, endpoint) = endpoint();
        let client = AudioClient::new(1, 1, "a");

        let a = endpoint.start_stream(&client).unwrap();
        let b = endpoint.start_stream(&client).unwrap();
        assert_eq!(device.start_count(), 1);
        assert_eq!(endpoint.running_stream_count(), 2);
        assert!(endpoint.is_callback_running());

        endpoint.stop_stream(a);
        assert_eq!(device.stop_count(), 0);
        endpoint.stop_stream(b);
        assert_eq!(device.stop_count(), 1);
        assert_eq!(endpoint.running_stream_count(), 0);
        assert!(!endpoint.is_callback_running());
    }

    #[test]
    fn test_extra_stop_is_ignored() {
        let (device, endpoint) = endpoint();
        let handle = endpoint.start_stream(&AudioClient::default()).unwrap();
        endpoint.stop_stream(handle);
        endpoint.stop_stream(handle);
        assert_eq!(device.stop_count(), 1);
        assert_eq!(endpoint.running_stream_count(), 0);
    }

    #[test]
    fn test_free_running_position_published() {
        let (_device, endpoint) = endpoint();
        assert!(matches!(
            endpoint.free_running_position(),
            Err(AAudioError::Unavailable(_))
        ));
        let handle = endpoint.start_stream(&AudioClient::default()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let position = endpoint.free_running_position().unwrap();
        assert!(position.position >= 192);
        assert_eq!(position.position % 192, 0);
        assert!(endpoint.timestamp().is_ok());
        endpoint.stop_stream(handle);
    }

    #[test]
    fn test_closed_endpoint_refuses_start() {
        let (_device, endpoint) = endpoint();
        endpoint.close().unwrap();
        assert_eq!(endpoint.state(), EndpointState::Closed);
        assert!(matches!(
            endpoint.start_stream(&AudioClient::default()),
            Err(AAudioError::InvalidState(_))
        ));
    }
}
