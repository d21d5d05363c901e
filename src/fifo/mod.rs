//! Frame FIFOs with local or shared-memory cursors

mod buffer;
mod controller;

pub use buffer::{FifoBuffer, WrappingBuffer};
pub use controller::{FifoController, FifoCounters, LocalCounters, SharedCounters};
