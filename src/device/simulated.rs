//! In-process exclusive stream that paces bursts on the monotonic clock
//!
//! Stands in for a real device: writes are consumed and reads produce a sine
//! tone, each burst taking as long as it would on hardware.

use crate::device::exclusive::{ClientHandle, ExclusiveStream};
use crate::error::{AAudioError, Result};
use crate::stream::{AudioClient, AudioFormat, SharingMode, StreamRequest};
use crate::sync::{frames_to_nanos, monotonic_nanos, realtime_nanos, ClockId, Timestamp};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Hardware characteristics of the simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDeviceConfig {
    pub device_id: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub frames_per_burst: i32,
    pub format: AudioFormat,
    /// Frequency of the tone produced for input streams
    pub tone_hz: f32,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            sample_rate: 48000,
            channels: 2,
            frames_per_burst: 192,
            format: AudioFormat::PCM_FLOAT,
            tone_hz: 440.0,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    format: AudioFormat,
    clients: HashMap<ClientHandle, AudioClient>,
    next_handle: i32,
    next_deadline: Option<Instant>,
}

/// Simulated exclusive-mode stream
pub struct SimulatedStream {
    config: SimulatedDeviceConfig,
    state: Mutex<DeviceState>,
    active: AtomicBool,
    disconnected: AtomicBool,
    frames_transferred: AtomicI64,
    last_burst_nanos: AtomicI64,
    start_count: AtomicU32,
    stop_count: AtomicU32,
    // f32 bits of the loudest sample in the last written burst
    last_peak: AtomicU32,
}

impl SimulatedStream {
    pub fn new(config: SimulatedDeviceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DeviceState::default()),
            active: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            frames_transferred: AtomicI64::new(0),
            last_burst_nanos: AtomicI64::new(0),
            start_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
            last_peak: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SimulatedDeviceConfig {
        &self.config
    }

    /// Number of `request_start` calls that started the hardware
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of `request_stop` calls that stopped the hardware
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }

    pub fn frames_transferred(&self) -> i64 {
        self.frames_transferred.load(Ordering::Acquire)
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Peak absolute sample value of the last written burst
    pub fn last_peak(&self) -> f32 {
        f32::from_bits(self.last_peak.load(Ordering::Relaxed))
    }

    /// Simulate the device going away
    pub fn disconnect(&self) {
        warn!("Simulated device {} disconnected", self.config.device_id);
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn bytes_per_frame(&self) -> Result<usize> {
        let format = self.state.lock().format;
        Ok(format.bytes_per_sample()? as usize * self.config.channels as usize)
    }

    fn check_io(&self, buffer_len: usize, frames: u32) -> Result<usize> {
        if self.is_disconnected() {
            return Err(AAudioError::Disconnected);
        }
        if !self.is_active() {
            return Err(AAudioError::invalid_state("device not started"));
        }
        let bytes = frames as usize * self.bytes_per_frame()?;
        if buffer_len < bytes {
            return Err(AAudioError::out_of_range("buffer size", buffer_len as i64));
        }
        Ok(bytes)
    }

    /// Block until the hardware would have consumed `frames` more frames
    fn pace(&self, frames: u32, timeout: Duration) -> Result<()> {
        let period =
            Duration::from_nanos(frames_to_nanos(frames as i64, self.config.sample_rate) as u64);
        let now = Instant::now();
        let deadline = {
            let mut state = self.state.lock();
            let deadline = match state.next_deadline {
                // Fell more than a burst behind: resync instead of catching up.
                Some(d) if d + period >= now => d,
                _ => now,
            };
            state.next_deadline = Some(deadline + period);
            deadline
        };

        let wait = deadline.saturating_duration_since(now);
        if wait > timeout {
            std::thread::sleep(timeout);
            return Err(AAudioError::Timeout);
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        Ok(())
    }

    fn advance(&self, frames: u32) {
        self.frames_transferred
            .fetch_add(frames as i64, Ordering::AcqRel);
        self.last_burst_nanos
            .store(monotonic_nanos(), Ordering::Release);
    }

    fn tone_sample(&self, frame: i64) -> f32 {
        let phase = frame as f64 * self.config.tone_hz as f64 / self.config.sample_rate as f64;
        (0.5 * (phase * std::f64::consts::TAU).sin()) as f32
    }
}

impl ExclusiveStream for SimulatedStream {
    fn open(&self, request: &StreamRequest) -> Result<()> {
        let parameters = request.parameters();
        parameters.validate()?;
        if request.sharing_mode_match_required()
            && parameters.sharing_mode() != SharingMode::EXCLUSIVE
        {
            return Err(AAudioError::device(
                crate::error::code::UNAVAILABLE,
                format!("only exclusive mode, {} required", parameters.sharing_mode()),
            ));
        }
        let requested_device = parameters.device_id();
        if requested_device != 0 && requested_device != self.config.device_id {
            return Err(AAudioError::device(
                crate::error::code::UNAVAILABLE,
                format!("no device {}", requested_device),
            ));
        }

        let mut state = self.state.lock();
        if state.open {
            return Err(AAudioError::invalid_state("device already open"));
        }
        state.format = match parameters.format() {
            AudioFormat::UNSPECIFIED => self.config.format,
            format => format,
        };
        state.open = true;
        state.next_handle = 1;
        self.disconnected.store(false, Ordering::SeqCst);
        info!(
            "Simulated device {} opened: {}Hz {}ch {} burst {}",
            self.config.device_id,
            self.config.sample_rate,
            self.config.channels,
            state.format,
            self.config.frames_per_burst
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(AAudioError::invalid_state("device not open"));
        }
        state.open = false;
        state.clients.clear();
        self.active.store(false, Ordering::SeqCst);
        debug!("Simulated device {} closed", self.config.device_id);
        Ok(())
    }

    fn request_start(&self) -> Result<()> {
        if self.is_disconnected() {
            return Err(AAudioError::Disconnected);
        }
        let mut state = self.state.lock();
        if !state.open {
            return Err(AAudioError::invalid_state("device not open"));
        }
        state.next_deadline = None;
        self.active.store(true, Ordering::SeqCst);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated device {} started", self.config.device_id);
        Ok(())
    }

    fn request_stop(&self) -> Result<()> {
        if !self.state.lock().open {
            return Err(AAudioError::invalid_state("device not open"));
        }
        self.active.store(false, Ordering::SeqCst);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated device {} stopped", self.config.device_id);
        Ok(())
    }

    fn start_client(&self, client: &AudioClient) -> Result<ClientHandle> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(AAudioError::invalid_state("device not open"));
        }
        let handle = ClientHandle(state.next_handle);
        state.next_handle += 1;
        state.clients.insert(handle, client.clone());
        trace!("Client pid {} registered as {}", client.pid, handle);
        Ok(handle)
    }

    fn stop_client(&self, handle: ClientHandle) -> Result<()> {
        match self.state.lock().clients.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(AAudioError::illegal_argument("client handle", handle.0)),
        }
    }

    fn frames_per_burst(&self) -> i32 {
        self.config.frames_per_burst
    }

    fn sample_rate(&self) -> i32 {
        self.config.sample_rate
    }

    fn samples_per_frame(&self) -> i32 {
        self.config.channels
    }

    fn device_id(&self) -> i32 {
        self.config.device_id
    }

    fn format(&self) -> AudioFormat {
        self.state.lock().format
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn timestamp(&self, clock: ClockId) -> Result<Timestamp> {
        let position = self.frames_transferred();
        if position == 0 {
            return Err(AAudioError::Unavailable("no frames transferred yet"));
        }
        let at = self.last_burst_nanos.load(Ordering::Acquire);
        let nanos = match clock {
            ClockId::Monotonic => at,
            ClockId::Realtime => realtime_nanos() - (monotonic_nanos() - at),
        };
        Ok(Timestamp::new(position, nanos))
    }

    fn write(&self, buffer: &[u8], frames: u32, timeout: Duration) -> Result<u32> {
        let bytes = self.check_io(buffer.len(), frames)?;
        if frames == 0 {
            return Ok(0);
        }
        let peak = match self.format() {
            AudioFormat::PCM_I16 => buffer[..bytes]
                .chunks_exact(2)
                .map(|s| (LittleEndian::read_i16(s) as f32 / 32768.0).abs())
                .fold(0.0f32, f32::max),
            _ => buffer[..bytes]
                .chunks_exact(4)
                .map(|s| LittleEndian::read_f32(s).abs())
                .fold(0.0f32, f32::max),
        };
        self.pace(frames, timeout)?;
        self.last_peak.store(peak.to_bits(), Ordering::Relaxed);
        self.advance(frames);
        Ok(frames)
    }

    fn read(&self, buffer: &mut [u8], frames: u32, timeout: Duration) -> Result<u32> {
        let bytes = self.check_io(buffer.len(), frames)?;
        if frames == 0 {
            return Ok(0);
        }
        self.pace(frames, timeout)?;

        let format = self.format();
        let channels = self.config.channels as usize;
        let start = self.frames_transferred();
        let sample_bytes = format.bytes_per_sample()? as usize;
        for (i, frame) in buffer[..bytes]
            .chunks_exact_mut(sample_bytes * channels)
            .enumerate()
        {
            let value = self.tone_sample(start + i as i64);
            for sample in frame.chunks_exact_mut(sample_bytes) {
                match format {
                    AudioFormat::PCM_I16 => {
                        LittleEndian::write_i16(sample, (value * 32767.0) as i16)
                    }
                    _ => LittleEndian::write_f32(sample, value),
                }
            }
        }
        self.advance(frames);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamParameters;

    fn exclusive_request(device_id: i32) -> StreamRequest {
        let mut params = StreamParameters::new();
        params
            .set_device_id(device_id)
            .set_sharing_mode(SharingMode::EXCLUSIVE)
            .set_format(AudioFormat::PCM_FLOAT);
        let mut request = StreamRequest::new(params, AudioClient::default());
        request.set_sharing_mode_match_required(true);
        request
    }

    fn open_device() -> SimulatedStream {
        let device = SimulatedStream::new(SimulatedDeviceConfig {
            device_id: 3,
            ..Default::default()
        });
        device.open(&exclusive_request(3)).unwrap();
        device
    }

    #[test]
    fn test_open_reports_hardware_values() {
        let device = open_device();
        assert_eq!(device.sample_rate(), 48000);
        assert_eq!(device.samples_per_frame(), 2);
        assert_eq!(device.frames_per_burst(), 192);
        assert_eq!(device.device_id(), 3);
        assert_eq!(device.format(), AudioFormat::PCM_FLOAT);
    }

    #[test]
    fn test_open_wrong_device() {
        let device = SimulatedStream::new(SimulatedDeviceConfig::default());
        assert!(matches!(
            device.open(&exclusive_request(9)),
            Err(AAudioError::Device { .. })
        ));
    }

    #[test]
    fn test_open_refuses_shared_when_match_required() {
        let device = SimulatedStream::new(SimulatedDeviceConfig::default());
        let mut request = exclusive_request(0);
        request.parameters_mut().set_sharing_mode(SharingMode::SHARED);
        assert!(matches!(
            device.open(&request),
            Err(AAudioError::Device { .. })
        ));

        request.set_sharing_mode_match_required(false);
        assert!(device.open(&request).is_ok());
    }

    #[test]
    fn test_io_requires_start() {
        let device = open_device();
        let buffer = vec![0u8; 192 * 8];
        assert!(matches!(
            device.write(&buffer, 192, Duration::from_secs(1)),
            Err(AAudioError::InvalidState(_))
        ));
        device.request_start().unwrap();
        assert_eq!(device.write(&buffer, 192, Duration::from_secs(1)), Ok(192));
        assert_eq!(device.frames_transferred(), 192);
        assert_eq!(device.start_count(), 1);
    }

    #[test]
    fn test_read_produces_tone() {
        let device = open_device();
        device.request_start().unwrap();
        let mut buffer = vec![0u8; 192 * 8];
        device.read(&mut buffer, 192, Duration::from_secs(1)).unwrap();
        let loudest = buffer
            .chunks_exact(4)
            .map(|s| LittleEndian::read_f32(s).abs())
            .fold(0.0f32, f32::max);
        assert!(loudest > 0.1);
    }

    #[test]
    fn test_client_handles() {
        let device = open_device();
        let a = device.start_client(&AudioClient::new(1, 1, "a")).unwrap();
        let b = device.start_client(&AudioClient::new(2, 2, "b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.client_count(), 2);
        device.stop_client(a).unwrap();
        assert!(device.stop_client(a).is_err());
    }

    #[test]
    fn test_disconnect() {
        let device = open_device();
        device.request_start().unwrap();
        device.disconnect();
        let buffer = vec![0u8; 192 * 8];
        assert_eq!(
            device.write(&buffer, 192, Duration::from_secs(1)),
            Err(AAudioError::Disconnected)
        );
    }

    #[test]
    fn test_timestamp_unavailable_before_io() {
        let device = open_device();
        assert!(matches!(
            device.timestamp(ClockId::Monotonic),
            Err(AAudioError::Unavailable(_))
        ));
    }
}
