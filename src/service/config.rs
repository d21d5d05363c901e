//! Service configuration file support

use crate::device::SimulatedDeviceConfig;
use crate::service::endpoint_shared::{EndpointConfig, DEFAULT_BUFFER_CAPACITY};
use crate::stream::{AudioFormat, Direction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Service configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    pub endpoint: EndpointSection,

    pub device: DeviceSection,

    /// Demo client streams opened by `run`
    pub clients: Vec<ClientSection>,
}

/// `[endpoint]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    /// Capacity requested from the exclusive stream, in frames
    pub buffer_capacity_frames: i32,

    /// How long stopping waits for the callback thread
    pub join_timeout_ms: u64,
}

/// `[device]` table describing the simulated exclusive device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub device_id: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub frames_per_burst: i32,
    /// "float" or "i16"
    pub format: String,
}

/// `[[clients]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// "output" or "input"
    pub direction: String,
    /// 0 = use the endpoint's channel count
    pub channels: i32,
    /// 0 = default capacity
    pub buffer_capacity_frames: i32,
    pub tone_hz: f32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: String::new(),
            endpoint: EndpointSection::default(),
            device: DeviceSection::default(),
            clients: Vec::new(),
        }
    }
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            buffer_capacity_frames: DEFAULT_BUFFER_CAPACITY,
            join_timeout_ms: 2000,
        }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_id: 0,
            sample_rate: 48000,
            channels: 2,
            frames_per_burst: 192,
            format: "float".to_string(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            direction: "output".to_string(),
            channels: 0,
            buffer_capacity_frames: 0,
            tone_hz: 440.0,
        }
    }
}

impl ClientSection {
    pub fn direction(&self) -> Result<Direction, ConfigError> {
        parse_direction(&self.direction)
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location: `<config dir>/aaudio-share/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("aaudio-share").join("config.toml"))
    }

    /// Load from the default location, or defaults when no file exists
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Reject values the endpoint or device could never accept
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.buffer_capacity_frames <= 0 {
            return Err(ConfigError::Invalid(format!(
                "endpoint.buffer_capacity_frames must be positive, got {}",
                self.endpoint.buffer_capacity_frames
            )));
        }
        if self.device.frames_per_burst <= 0 {
            return Err(ConfigError::Invalid(format!(
                "device.frames_per_burst must be positive, got {}",
                self.device.frames_per_burst
            )));
        }
        if !(1..=8).contains(&self.device.channels) {
            return Err(ConfigError::Invalid(format!(
                "device.channels must be 1..=8, got {}",
                self.device.channels
            )));
        }
        if self.device.sample_rate <= 0 {
            return Err(ConfigError::Invalid(format!(
                "device.sample_rate must be positive, got {}",
                self.device.sample_rate
            )));
        }
        parse_format(&self.device.format)?;
        for client in &self.clients {
            client.direction()?;
        }
        Ok(())
    }

    /// Convert to EndpointConfig
    pub fn to_endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            buffer_capacity_frames: self.endpoint.buffer_capacity_frames,
            join_timeout: Duration::from_millis(self.endpoint.join_timeout_ms),
        }
    }

    /// Convert to SimulatedDeviceConfig
    pub fn to_device_config(&self) -> Result<SimulatedDeviceConfig, ConfigError> {
        Ok(SimulatedDeviceConfig {
            device_id: self.device.device_id,
            sample_rate: self.device.sample_rate,
            channels: self.device.channels,
            frames_per_burst: self.device.frames_per_burst,
            format: parse_format(&self.device.format)?,
            ..SimulatedDeviceConfig::default()
        })
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# aaudio-share configuration

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""

[endpoint]
# Capacity requested from the exclusive stream, in frames (default: 384)
buffer_capacity_frames = 384
# How long stopping waits for the callback thread, in milliseconds
join_timeout_ms = 2000

[device]
# Simulated exclusive device
device_id = 0
sample_rate = 48000
channels = 2
frames_per_burst = 192
# "float" or "i16"
format = "float"

# Demo client streams for `run`
[[clients]]
direction = "output"
channels = 0
buffer_capacity_frames = 0
tone_hz = 440.0

[[clients]]
direction = "output"
channels = 0
buffer_capacity_frames = 960
tone_hz = 660.0
"#
        .to_string()
    }
}

/// Parse a format name as used in the config file and on the command line
pub fn parse_format(name: &str) -> Result<AudioFormat, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "float" | "f32" | "pcm_float" => Ok(AudioFormat::PCM_FLOAT),
        "i16" | "pcm16" | "pcm_i16" => Ok(AudioFormat::PCM_I16),
        "unspecified" | "" => Ok(AudioFormat::UNSPECIFIED),
        other => Err(ConfigError::Invalid(format!("unknown format '{}'", other))),
    }
}

/// Parse a direction name
pub fn parse_direction(name: &str) -> Result<Direction, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "output" | "out" => Ok(Direction::OUTPUT),
        "input" | "in" => Ok(Direction::INPUT),
        other => Err(ConfigError::Invalid(format!("unknown direction '{}'", other))),
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),

    /// Value outside what the service accepts
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses() {
        let config: ServiceConfig = toml::from_str(&ServiceConfig::sample_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint.buffer_capacity_frames, 384);
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.clients[1].tone_hz, 660.0);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ServiceConfig = toml::from_str("[device]\nchannels = 1\n").unwrap();
        assert_eq!(config.device.channels, 1);
        assert_eq!(config.device.sample_rate, 48000);
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.to_endpoint_config().join_timeout,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.device.format = "mp3".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServiceConfig::default();
        config.device.channels = 9;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.clients.push(ClientSection {
            direction: "sideways".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("aaudio-share-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = ServiceConfig::default();
        config.device.device_id = 5;
        config.save(&path).unwrap();

        let loaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(loaded.device.device_id, 5);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            ServiceConfig::load("/nonexistent/aaudio-share.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(parse_format("I16").unwrap(), AudioFormat::PCM_I16);
        assert_eq!(parse_direction("in").unwrap(), Direction::INPUT);
    }
}
