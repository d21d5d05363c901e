//! Service side: shared endpoints, client streams and their configuration

mod config;
mod endpoint_shared;
mod manager;
mod mixer;
mod stream_shared;

pub use config::{
    parse_direction, parse_format, ClientSection, ConfigError, DeviceSection, EndpointSection,
    ServiceConfig,
};
pub use endpoint_shared::{
    EndpointConfig, EndpointProperties, EndpointState, SharedEndpoint, DEFAULT_BUFFER_CAPACITY,
};
pub use manager::{DeviceFactory, EndpointManager};
pub use mixer::{burst_bytes, decode_samples, encode_samples, AudioMixer};
pub use stream_shared::{
    calculate_buffer_capacity, SharedStream, StreamState, DEFAULT_BURSTS_PER_BUFFER,
    MAX_FRAMES_PER_BUFFER, MIN_BURSTS_PER_BUFFER,
};
