//! Error taxonomy shared by transports, drivers and the profile layer.
//!
//! Wire-level failures ([`TransportError`], [`ProtocolError`]) bubble up to the
//! worker that issued the request. Validation failures never reach device
//! workers; they are folded into a [`Status`] code for CLI/D-Bus callers.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single exchange on a device transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device did not answer within the request timeout.
    #[error("transport timeout")]
    Timeout,

    /// The kernel rejected the transfer (stall, broken pipe, I/O error).
    #[error("transport pipe error: {0}")]
    Pipe(String),

    /// The device or endpoint disappeared.
    #[error("device not found")]
    NotFound,

    /// Fewer bytes came back than the protocol frame requires.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The transport was closed by `stop()`.
    #[error("device handle is closed")]
    ClosedHandle,
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        TransportError::Pipe(e.to_string())
    }
}

impl From<i2cdev::linux::LinuxI2CError> for TransportError {
    fn from(e: i2cdev::linux::LinuxI2CError) -> Self {
        TransportError::Pipe(format!("smbus: {e}"))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            std::io::ErrorKind::NotFound => TransportError::NotFound,
            _ => TransportError::Pipe(e.to_string()),
        }
    }
}

/// The device answered, but not with what the protocol promises.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected opcode in response: expected {expected:#04x}, got {got:#04x}")]
    UnexpectedOpcode { expected: u8, got: u8 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Rejected user mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("device has no pump channel")]
    NoPump,

    #[error("profile '{0}' is only valid on power supplies")]
    NotPsu(String),

    #[error("probe {0} does not exist")]
    UnknownProbe(String),

    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("unknown channel {0}")]
    UnknownChannel(u8),

    #[error("operation not supported by {0}")]
    Unsupported(&'static str),
}

/// Configuration/profile files that could not be used as-is.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing file {0}")]
    MissingFile(PathBuf),

    #[error("bad json in {path}: {message}")]
    BadJson { path: PathBuf, message: String },

    #[error("profile store i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Umbrella error for per-device operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("lcd rendering failed: {0}")]
    Render(String),

    /// The device cannot proceed safely (profile root unusable).
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Result code handed to CLI / D-Bus callers instead of error strings.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Rejected = 0,
    Applied = 1,
    Precondition = 2,
    UnknownProbe = 3,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<&ValidationError> for Status {
    fn from(e: &ValidationError) -> Self {
        match e {
            ValidationError::NoPump | ValidationError::NotPsu(_) => Status::Precondition,
            ValidationError::UnknownProbe(_) => Status::UnknownProbe,
            _ => Status::Rejected,
        }
    }
}

impl<T> From<Result<T, ValidationError>> for Status {
    fn from(r: Result<T, ValidationError>) -> Self {
        match r {
            Ok(_) => Status::Applied,
            Err(e) => Status::from(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Rejected.code(), 0);
        assert_eq!(Status::Applied.code(), 1);
        assert_eq!(Status::Precondition.code(), 2);
        assert_eq!(Status::UnknownProbe.code(), 3);
    }

    #[test]
    fn validation_errors_map_to_status() {
        assert_eq!(Status::from(Ok::<(), ValidationError>(())), Status::Applied);
        assert_eq!(
            Status::from(Err::<(), _>(ValidationError::NoPump)),
            Status::Precondition
        );
        assert_eq!(
            Status::from(Err::<(), _>(ValidationError::UnknownProbe("x:1".into()))),
            Status::UnknownProbe
        );
        assert_eq!(
            Status::from(Err::<(), _>(ValidationError::OutOfRange {
                field: "brightness",
                value: 101
            })),
            Status::Rejected
        );
    }

    #[test]
    fn io_errors_map_to_transport_kinds() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "t");
        assert_eq!(TransportError::from(timeout), TransportError::Timeout);
        let gone = std::io::Error::new(std::io::ErrorKind::NotFound, "n");
        assert_eq!(TransportError::from(gone), TransportError::NotFound);
    }
}
