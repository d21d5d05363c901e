//! Unified error types for the shared audio endpoint

use thiserror::Error;

/// Numeric result codes exchanged with clients
pub mod code {
    pub const OK: i32 = 0;
    pub const ERROR_BASE: i32 = -900;
    pub const DISCONNECTED: i32 = -899;
    pub const ILLEGAL_ARGUMENT: i32 = -898;
    pub const INTERNAL: i32 = -896;
    pub const INVALID_STATE: i32 = -895;
    pub const UNAVAILABLE: i32 = -889;
    pub const NO_MEMORY: i32 = -887;
    pub const TIMEOUT: i32 = -885;
    pub const INVALID_FORMAT: i32 = -883;
    pub const OUT_OF_RANGE: i32 = -882;
}

/// Main error type for endpoint, FIFO and transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AAudioError {
    /// Numeric field outside its documented bound
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    /// Enumerated field with a value outside its known set
    #[error("illegal {field}: {value}")]
    IllegalArgument { field: &'static str, value: i64 },

    /// Sample format unset or unrecognized where a concrete format is required
    #[error("invalid audio format: {0}")]
    InvalidFormat(i32),

    /// Result cannot be produced yet
    #[error("{0} unavailable")]
    Unavailable(&'static str),

    /// Invariant violated on data presumed already validated
    #[error("internal error: {0}")]
    Internal(String),

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Underlying device went away
    #[error("stream disconnected")]
    Disconnected,

    /// Blocking operation did not complete in time
    #[error("operation timed out")]
    Timeout,

    /// Memory for a buffer or region could not be obtained
    #[error("out of memory")]
    NoMemory,

    /// Failure reported by the underlying exclusive stream, carried unchanged
    #[error("device error {code}: {message}")]
    Device { code: i32, message: String },
}

/// Result type alias for endpoint operations
pub type Result<T> = std::result::Result<T, AAudioError>;

impl AAudioError {
    pub fn out_of_range(field: &'static str, value: impl Into<i64>) -> Self {
        Self::OutOfRange {
            field,
            value: value.into(),
        }
    }

    pub fn illegal_argument(field: &'static str, value: impl Into<i64>) -> Self {
        Self::IllegalArgument {
            field,
            value: value.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a device error with context
    pub fn device(code: i32, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            message: message.into(),
        }
    }

    /// Result code reported to the client for this error
    pub fn result_code(&self) -> i32 {
        match self {
            Self::OutOfRange { .. } => code::OUT_OF_RANGE,
            Self::IllegalArgument { .. } => code::ILLEGAL_ARGUMENT,
            Self::InvalidFormat(_) => code::INVALID_FORMAT,
            Self::Unavailable(_) => code::UNAVAILABLE,
            Self::Internal(_) => code::INTERNAL,
            Self::InvalidState(_) => code::INVALID_STATE,
            Self::Disconnected => code::DISCONNECTED,
            Self::Timeout => code::TIMEOUT,
            Self::NoMemory => code::NO_MEMORY,
            Self::Device { code, .. } => *code,
        }
    }

    /// Rebuild an error from a code received over the wire
    ///
    /// Field context is lost in transit, so range and argument errors come back
    /// attributed to `"remote"`.
    pub fn from_result_code(result: i32) -> Result<()> {
        match result {
            r if r >= code::OK => Ok(()),
            code::OUT_OF_RANGE => Err(Self::out_of_range("remote", 0)),
            code::ILLEGAL_ARGUMENT => Err(Self::illegal_argument("remote", 0)),
            code::INVALID_FORMAT => Err(Self::InvalidFormat(0)),
            code::UNAVAILABLE => Err(Self::Unavailable("remote result")),
            code::INTERNAL => Err(Self::internal("remote internal error")),
            code::INVALID_STATE => Err(Self::invalid_state("remote invalid state")),
            code::DISCONNECTED => Err(Self::Disconnected),
            code::TIMEOUT => Err(Self::Timeout),
            code::NO_MEMORY => Err(Self::NoMemory),
            other => Err(Self::device(other, "remote device error")),
        }
    }

    /// Check if this error is transient (caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AAudioError::Unavailable(_) | AAudioError::Timeout | AAudioError::Device { .. }
        )
    }
}

/// Collapse a result into the code sent back to the client
pub fn to_result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => code::OK,
        Err(e) => e.result_code(),
    }
}
