//! Stream parameter descriptor and its validation

use crate::binding::Parcel;
use crate::error::{AAudioError, Result};
use std::fmt;

/// Value meaning "let the service choose"
pub const UNSPECIFIED: i32 = 0;

pub const SAMPLES_PER_FRAME_MIN: i32 = 1;
pub const SAMPLES_PER_FRAME_MAX: i32 = 8;

pub const SAMPLE_RATE_HZ_MIN: i32 = 8000;
pub const SAMPLE_RATE_HZ_MAX: i32 = 1_600_000;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub i32);

        impl $name {
            $(pub const $variant: Self = Self($value);)+

            /// Whether the raw value is one of the known variants
            pub fn is_valid(self) -> bool {
                matches!(self.0, $($value)|+)
            }

            fn label(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($variant)),)+
                    _ => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.label() {
                    Some(label) => f.write_str(label),
                    None => write!(f, "{}({})", stringify!($name), self.0),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

wire_enum!(
    /// Whether the stream owns the device or is mixed with others
    SharingMode {
        EXCLUSIVE = 0,
        SHARED = 1,
    }
);

wire_enum!(
    /// Sample encoding
    AudioFormat {
        UNSPECIFIED = 0,
        PCM_I16 = 1,
        PCM_FLOAT = 2,
    }
);

wire_enum!(
    /// Data flow relative to the device
    Direction {
        OUTPUT = 0,
        INPUT = 1,
    }
);

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::UNSPECIFIED
    }
}

impl AudioFormat {
    /// Bytes per sample; fails for formats without a concrete size
    pub fn bytes_per_sample(self) -> Result<u32> {
        match self {
            AudioFormat::PCM_I16 => Ok(2),
            AudioFormat::PCM_FLOAT => Ok(4),
            other => Err(AAudioError::InvalidFormat(other.0)),
        }
    }
}

/// Requested or negotiated configuration of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParameters {
    samples_per_frame: i32,
    sample_rate: i32,
    device_id: i32,
    sharing_mode: SharingMode,
    format: AudioFormat,
    direction: Direction,
    buffer_capacity: i32,
}

impl Default for StreamParameters {
    fn default() -> Self {
        Self {
            samples_per_frame: UNSPECIFIED,
            sample_rate: UNSPECIFIED,
            device_id: UNSPECIFIED,
            sharing_mode: SharingMode::SHARED,
            format: AudioFormat::UNSPECIFIED,
            direction: Direction::OUTPUT,
            buffer_capacity: UNSPECIFIED,
        }
    }
}

impl StreamParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_per_frame(&self) -> i32 {
        self.samples_per_frame
    }

    pub fn sample_rate(&self) -> i32 {
        self.sample_rate
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn sharing_mode(&self) -> SharingMode {
        self.sharing_mode
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn buffer_capacity(&self) -> i32 {
        self.buffer_capacity
    }

    pub fn set_samples_per_frame(&mut self, samples_per_frame: i32) -> &mut Self {
        self.samples_per_frame = samples_per_frame;
        self
    }

    pub fn set_sample_rate(&mut self, sample_rate: i32) -> &mut Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn set_device_id(&mut self, device_id: i32) -> &mut Self {
        self.device_id = device_id;
        self
    }

    pub fn set_sharing_mode(&mut self, sharing_mode: SharingMode) -> &mut Self {
        self.sharing_mode = sharing_mode;
        self
    }

    pub fn set_format(&mut self, format: AudioFormat) -> &mut Self {
        self.format = format;
        self
    }

    pub fn set_direction(&mut self, direction: Direction) -> &mut Self {
        self.direction = direction;
        self
    }

    pub fn set_buffer_capacity(&mut self, frames: i32) -> &mut Self {
        self.buffer_capacity = frames;
        self
    }

    /// Field-wise copy, no validation
    pub fn copy_from(&mut self, other: &StreamParameters) {
        *self = *other;
    }

    /// Check every field against its bounds, stopping at the first violation
    pub fn validate(&self) -> Result<()> {
        if self.samples_per_frame != UNSPECIFIED
            && !(SAMPLES_PER_FRAME_MIN..=SAMPLES_PER_FRAME_MAX).contains(&self.samples_per_frame)
        {
            return Err(AAudioError::out_of_range(
                "samples per frame",
                self.samples_per_frame,
            ));
        }

        if self.device_id < 0 {
            return Err(AAudioError::out_of_range("device id", self.device_id));
        }

        if !self.sharing_mode.is_valid() {
            return Err(AAudioError::illegal_argument(
                "sharing mode",
                self.sharing_mode.0,
            ));
        }

        if !self.format.is_valid() {
            return Err(AAudioError::InvalidFormat(self.format.0));
        }

        if self.sample_rate != UNSPECIFIED
            && !(SAMPLE_RATE_HZ_MIN..=SAMPLE_RATE_HZ_MAX).contains(&self.sample_rate)
        {
            return Err(AAudioError::out_of_range("sample rate", self.sample_rate));
        }

        if self.buffer_capacity < 0 {
            return Err(AAudioError::out_of_range(
                "buffer capacity",
                self.buffer_capacity,
            ));
        }

        if !self.direction.is_valid() {
            return Err(AAudioError::illegal_argument("direction", self.direction.0));
        }

        Ok(())
    }

    /// `samples_per_frame × bytes per sample`
    pub fn calculate_bytes_per_frame(&self) -> Result<u32> {
        let bytes_per_sample = self.format.bytes_per_sample()?;
        if self.samples_per_frame <= 0 {
            return Err(AAudioError::out_of_range(
                "samples per frame",
                self.samples_per_frame,
            ));
        }
        Ok(self.samples_per_frame as u32 * bytes_per_sample)
    }

    /// Wire order: device id, sample rate, samples per frame, sharing mode,
    /// format, direction, buffer capacity
    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.device_id);
        parcel.write_i32(self.sample_rate);
        parcel.write_i32(self.samples_per_frame);
        parcel.write_i32(self.sharing_mode.0);
        parcel.write_i32(self.format.0);
        parcel.write_i32(self.direction.0);
        parcel.write_i32(self.buffer_capacity);
    }

    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        Ok(Self {
            device_id: parcel.read_i32()?,
            sample_rate: parcel.read_i32()?,
            samples_per_frame: parcel.read_i32()?,
            sharing_mode: SharingMode(parcel.read_i32()?),
            format: AudioFormat(parcel.read_i32()?),
            direction: Direction(parcel.read_i32()?),
            buffer_capacity: parcel.read_i32()?,
        })
    }
}

impl fmt::Display for StreamParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {} {} {}Hz {}ch {} {} capacity {}",
            self.device_id,
            self.direction,
            self.sample_rate,
            self.samples_per_frame,
            self.format,
            self.sharing_mode,
            self.buffer_capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> StreamParameters {
        let mut params = StreamParameters::new();
        params
            .set_samples_per_frame(2)
            .set_sample_rate(48000)
            .set_device_id(3)
            .set_format(AudioFormat::PCM_FLOAT)
            .set_buffer_capacity(960);
        params
    }

    #[test]
    fn test_defaults_validate() {
        assert!(StreamParameters::default().validate().is_ok());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_each_field_reports_its_own_error() {
        let mut params = valid();
        params.set_samples_per_frame(9);
        assert_eq!(
            params.validate(),
            Err(AAudioError::out_of_range("samples per frame", 9))
        );

        let mut params = valid();
        params.set_device_id(-1);
        assert_eq!(
            params.validate(),
            Err(AAudioError::out_of_range("device id", -1))
        );

        let mut params = valid();
        params.set_sharing_mode(SharingMode(99));
        assert_eq!(
            params.validate(),
            Err(AAudioError::illegal_argument("sharing mode", 99))
        );

        let mut params = valid();
        params.set_format(AudioFormat(7));
        assert_eq!(params.validate(), Err(AAudioError::InvalidFormat(7)));

        let mut params = valid();
        params.set_sample_rate(7999);
        assert_eq!(
            params.validate(),
            Err(AAudioError::out_of_range("sample rate", 7999))
        );

        let mut params = valid();
        params.set_sample_rate(SAMPLE_RATE_HZ_MAX + 1);
        assert!(params.validate().is_err());

        let mut params = valid();
        params.set_buffer_capacity(-5);
        assert_eq!(
            params.validate(),
            Err(AAudioError::out_of_range("buffer capacity", -5))
        );

        let mut params = valid();
        params.set_direction(Direction(2));
        assert_eq!(
            params.validate(),
            Err(AAudioError::illegal_argument("direction", 2))
        );
    }

    #[test]
    fn test_first_violation_wins() {
        let mut params = valid();
        params.set_samples_per_frame(0x100).set_sample_rate(1);
        assert!(matches!(
            params.validate(),
            Err(AAudioError::OutOfRange { field: "samples per frame", .. })
        ));
    }

    #[test]
    fn test_bytes_per_frame() {
        assert_eq!(valid().calculate_bytes_per_frame(), Ok(8));
        let mut params = valid();
        params.set_format(AudioFormat::PCM_I16).set_samples_per_frame(6);
        assert_eq!(params.calculate_bytes_per_frame(), Ok(12));
        params.set_format(AudioFormat::UNSPECIFIED);
        assert_eq!(
            params.calculate_bytes_per_frame(),
            Err(AAudioError::InvalidFormat(0))
        );
    }

    #[test]
    fn test_parcel_order() {
        let params = valid();
        let mut parcel = Parcel::new();
        params.write_to_parcel(&mut parcel);
        assert_eq!(parcel.read_i32().unwrap(), 3);
        assert_eq!(parcel.read_i32().unwrap(), 48000);

        parcel.rewind();
        assert_eq!(StreamParameters::read_from_parcel(&mut parcel).unwrap(), params);
    }

    #[test]
    fn test_copy_from_skips_validation() {
        let mut bad = valid();
        bad.set_sharing_mode(SharingMode(5));
        let mut copy = StreamParameters::new();
        copy.copy_from(&bad);
        assert_eq!(copy, bad);
    }

    #[test]
    fn test_debug_labels() {
        assert_eq!(format!("{:?}", SharingMode::EXCLUSIVE), "EXCLUSIVE");
        assert_eq!(format!("{}", Direction(9)), "Direction(9)");
    }
}
