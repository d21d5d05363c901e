//! Stream configuration and client requests

mod parameters;
mod request;

pub use parameters::{
    AudioFormat, Direction, SharingMode, StreamParameters, SAMPLES_PER_FRAME_MAX,
    SAMPLES_PER_FRAME_MIN, SAMPLE_RATE_HZ_MAX, SAMPLE_RATE_HZ_MIN, UNSPECIFIED,
};
pub use request::{AudioClient, StreamRequest};
