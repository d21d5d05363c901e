//! Fixed-size service messages carried on the message queues

use crate::error::{AAudioError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Bytes per message frame
pub const MESSAGE_BYTES: usize = 24;

const WHAT_TIMESTAMP: i32 = 1;
const WHAT_EVENT: i32 = 2;

/// Stream events pushed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Started,
    Stopped,
    Closed,
    Disconnected,
}

impl ServiceEvent {
    fn code(self) -> i32 {
        match self {
            ServiceEvent::Started => 1,
            ServiceEvent::Stopped => 2,
            ServiceEvent::Closed => 3,
            ServiceEvent::Disconnected => 4,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ServiceEvent::Started),
            2 => Some(ServiceEvent::Stopped),
            3 => Some(ServiceEvent::Closed),
            4 => Some(ServiceEvent::Disconnected),
            _ => None,
        }
    }
}

/// Message from the service to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMessage {
    /// Frame position of the stream at `nanos` on the monotonic clock
    Timestamp { position: i64, nanos: i64 },
    Event { event: ServiceEvent, data: i64 },
}

impl ServiceMessage {
    /// Layout: `what: i32`, `event: i32`, `data: i64`, `nanos: i64`
    pub fn encode(&self) -> [u8; MESSAGE_BYTES] {
        let mut frame = [0u8; MESSAGE_BYTES];
        let (what, event, data, nanos) = match *self {
            ServiceMessage::Timestamp { position, nanos } => (WHAT_TIMESTAMP, 0, position, nanos),
            ServiceMessage::Event { event, data } => (WHAT_EVENT, event.code(), data, 0),
        };
        LittleEndian::write_i32(&mut frame[0..4], what);
        LittleEndian::write_i32(&mut frame[4..8], event);
        LittleEndian::write_i64(&mut frame[8..16], data);
        LittleEndian::write_i64(&mut frame[16..24], nanos);
        frame
    }

    pub fn decode(frame: &[u8; MESSAGE_BYTES]) -> Result<Self> {
        let what = LittleEndian::read_i32(&frame[0..4]);
        let event = LittleEndian::read_i32(&frame[4..8]);
        let data = LittleEndian::read_i64(&frame[8..16]);
        let nanos = LittleEndian::read_i64(&frame[16..24]);
        match what {
            WHAT_TIMESTAMP => Ok(ServiceMessage::Timestamp {
                position: data,
                nanos,
            }),
            WHAT_EVENT => ServiceEvent::from_code(event)
                .map(|event| ServiceMessage::Event { event, data })
                .ok_or_else(|| AAudioError::internal(format!("unknown service event {}", event))),
            other => Err(AAudioError::internal(format!(
                "unknown service message {}",
                other
            ))),
        }
    }
}
