//! Interface to an exclusive-mode hardware stream

use crate::error::Result;
use crate::stream::{AudioClient, AudioFormat, StreamRequest};
use crate::sync::{ClockId, Timestamp};
use std::fmt;
use std::time::Duration;

/// Handle the device hands out for each registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub i32);

impl ClientHandle {
    pub const INVALID: ClientHandle = ClientHandle(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A hardware stream owned by exactly one client.
///
/// The shared endpoint is that client and multiplexes it among many. All
/// methods take `&self`; implementations synchronize internally because the
/// callback thread does I/O while control threads start and stop clients.
///
/// The endpoint owns its callback thread, so there is no thread hook here.
/// The device paces that thread: `write` and `read` block until the hardware
/// has taken or produced one burst, about one burst period.
pub trait ExclusiveStream: Send + Sync {
    /// Open with the requested configuration. The negotiated values are
    /// reported afterwards by the getters. When the request has
    /// `sharing_mode_match_required` set, a device that cannot give the
    /// requested sharing mode must fail instead of falling back.
    fn open(&self, request: &StreamRequest) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn request_start(&self) -> Result<()>;

    fn request_stop(&self) -> Result<()>;

    /// Register a client session with the running hardware
    fn start_client(&self, client: &AudioClient) -> Result<ClientHandle>;

    fn stop_client(&self, handle: ClientHandle) -> Result<()>;

    fn frames_per_burst(&self) -> i32;

    fn sample_rate(&self) -> i32;

    fn samples_per_frame(&self) -> i32;

    fn device_id(&self) -> i32;

    fn format(&self) -> AudioFormat;

    /// Whether the hardware is started
    fn is_active(&self) -> bool;

    /// Position of the hardware and the time it was reached
    fn timestamp(&self, clock: ClockId) -> Result<Timestamp>;

    /// Blocking write of `frames` frames from `buffer`, returning frames written
    fn write(&self, buffer: &[u8], frames: u32, timeout: Duration) -> Result<u32>;

    /// Blocking read of `frames` frames into `buffer`, returning frames read
    fn read(&self, buffer: &mut [u8], frames: u32, timeout: Duration) -> Result<u32>;
}
