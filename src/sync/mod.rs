//! Clocks and timestamp publication

mod clock;

pub use clock::{
    frames_to_nanos, monotonic_nanos, realtime_nanos, AtomicTimestamp, ClockId, Timestamp,
};
