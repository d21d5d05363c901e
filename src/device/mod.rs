//! Exclusive-mode device streams

mod exclusive;
mod simulated;

pub use exclusive::{ClientHandle, ExclusiveStream};
pub use simulated::{SimulatedDeviceConfig, SimulatedStream};
