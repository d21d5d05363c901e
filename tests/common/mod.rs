//! Shared helpers for integration tests

#![allow(dead_code)]

use aaudio_share::device::{ClientHandle, ExclusiveStream, SimulatedDeviceConfig, SimulatedStream};
use aaudio_share::error::{AAudioError, Result};
use aaudio_share::service::{EndpointConfig, SharedEndpoint};
use aaudio_share::stream::{
    AudioClient, AudioFormat, Direction, StreamParameters, StreamRequest,
};
use aaudio_share::sync::{ClockId, Timestamp};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub const DEVICE_ID: i32 = 3;

/// Simulated device that can be told to fail individual calls
pub struct FaultyStream {
    pub inner: SimulatedStream,
    pub fail_start: AtomicBool,
    pub fail_start_client: AtomicBool,
    pub fail_stop_client: AtomicBool,
    /// The next `write` sleeps this many milliseconds first
    pub stall_next_write_ms: AtomicU64,
    /// Threads that have called `write`
    pub writers: Mutex<HashSet<ThreadId>>,
    /// Request the device was last opened with
    pub opened_with: Mutex<Option<StreamRequest>>,
}

impl FaultyStream {
    pub fn new(config: SimulatedDeviceConfig) -> Self {
        Self {
            inner: SimulatedStream::new(config),
            fail_start: AtomicBool::new(false),
            fail_start_client: AtomicBool::new(false),
            fail_stop_client: AtomicBool::new(false),
            stall_next_write_ms: AtomicU64::new(0),
            writers: Mutex::new(HashSet::new()),
            opened_with: Mutex::new(None),
        }
    }

    fn injected(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(AAudioError::device(-5, format!("injected {} failure", what)))
        } else {
            Ok(())
        }
    }
}

impl ExclusiveStream for FaultyStream {
    fn open(&self, request: &StreamRequest) -> Result<()> {
        *self.opened_with.lock() = Some(request.clone());
        self.inner.open(request)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn request_start(&self) -> Result<()> {
        Self::injected(&self.fail_start, "start")?;
        self.inner.request_start()
    }

    fn request_stop(&self) -> Result<()> {
        self.inner.request_stop()
    }

    fn start_client(&self, client: &AudioClient) -> Result<ClientHandle> {
        Self::injected(&self.fail_start_client, "start_client")?;
        self.inner.start_client(client)
    }

    fn stop_client(&self, handle: ClientHandle) -> Result<()> {
        Self::injected(&self.fail_stop_client, "stop_client")?;
        self.inner.stop_client(handle)
    }

    fn frames_per_burst(&self) -> i32 {
        self.inner.frames_per_burst()
    }

    fn sample_rate(&self) -> i32 {
        self.inner.sample_rate()
    }

    fn samples_per_frame(&self) -> i32 {
        self.inner.samples_per_frame()
    }

    fn device_id(&self) -> i32 {
        self.inner.device_id()
    }

    fn format(&self) -> AudioFormat {
        self.inner.format()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn timestamp(&self, clock: ClockId) -> Result<Timestamp> {
        self.inner.timestamp(clock)
    }

    fn write(&self, buffer: &[u8], frames: u32, timeout: Duration) -> Result<u32> {
        self.writers.lock().insert(thread::current().id());
        let stall = self.stall_next_write_ms.swap(0, Ordering::SeqCst);
        if stall > 0 {
            thread::sleep(Duration::from_millis(stall));
        }
        self.inner.write(buffer, frames, timeout)
    }

    fn read(&self, buffer: &mut [u8], frames: u32, timeout: Duration) -> Result<u32> {
        self.inner.read(buffer, frames, timeout)
    }
}

pub fn device_config() -> SimulatedDeviceConfig {
    SimulatedDeviceConfig {
        device_id: DEVICE_ID,
        ..SimulatedDeviceConfig::default()
    }
}

pub fn request(direction: Direction) -> StreamRequest {
    let mut parameters = StreamParameters::new();
    parameters.set_device_id(DEVICE_ID).set_direction(direction);
    StreamRequest::new(parameters, AudioClient::new(42, 1000, "integration"))
}

pub fn client(pid: i32) -> AudioClient {
    AudioClient::new(pid, 1000, format!("client-{}", pid))
}

/// Open a shared output endpoint over a fault-injecting device
pub fn faulty_endpoint() -> (Arc<FaultyStream>, Arc<SharedEndpoint>) {
    faulty_endpoint_with(&EndpointConfig::default())
}

pub fn faulty_endpoint_with(config: &EndpointConfig) -> (Arc<FaultyStream>, Arc<SharedEndpoint>) {
    let device = Arc::new(FaultyStream::new(device_config()));
    let endpoint =
        SharedEndpoint::open(device.clone(), &request(Direction::OUTPUT), config).unwrap();
    (device, Arc::new(endpoint))
}
