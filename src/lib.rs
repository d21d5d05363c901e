//! aaudio-share - shared-mode low-latency audio endpoint
//!
//! Multiplexes several client streams onto one exclusive-mode device stream.
//! Clients exchange audio with the service through lock-free FIFOs in shared
//! memory, described to them by an endpoint descriptor sent over a parcel.

pub mod binding;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod fifo;
pub mod service;
pub mod stream;
pub mod sync;

pub use error::{AAudioError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
