//! Custom error types for the HPLC interface.
//!
//! `HplcError` consolidates every failure the library can report, from reading
//! the experiment configuration to talking with the modular devices over
//! serial. The binary wraps these in `anyhow` at the edges; library callers
//! match on the variants.
//!
//! ## Error Hierarchy
//!
//! - **Configuration**: `ConfigParse`, `Figment`, `Configuration`. Permanent,
//!   fix the file and restart.
//! - **Communication**: `Io`, `Serial`, `Protocol`, `Timeout`. Possibly
//!   transient; the client retries these.
//! - **Device**: `Device`, `DeviceNotConnected`. The firmware answered with an
//!   error, or a required device was never discovered.
//! - **State**: `Verification`, `NotSetUp`. The rig is not in the state the
//!   experiment requires.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, HplcError>;

/// Primary error type for the HPLC interface.
#[derive(Error, Debug)]
pub enum HplcError {
    /// Standard I/O operation failed.
    ///
    /// Covers reading the experiment file, writing recordings, and raw port
    /// reads/writes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or enumerated.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Experiment YAML did not parse.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Layered runtime settings could not be extracted.
    #[error("Settings error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Device sent something that is not a well-formed response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device understood the request and answered with an error object.
    ///
    /// This is the equivalent of the firmware raising an exception for the
    /// named method. It is never retried.
    #[error("Device error from '{method}': {message}")]
    Device {
        /// Method that was invoked on the device.
        method: String,
        /// Message reported by the firmware.
        message: String,
    },

    /// No complete response arrived within the configured timeout.
    #[error("Timed out after {timeout_ms}ms waiting for '{method}'")]
    Timeout {
        /// Method that was invoked on the device.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A required device was not found during discovery.
    #[error("{0} is not connected!")]
    DeviceNotConnected(String),

    /// A value read back from a device did not match what was configured.
    #[error("{0}")]
    Verification(String),

    /// An operation needs `setup()` to have completed first.
    #[error("Interface is not set up")]
    NotSetUp,
}

impl From<figment::Error> for HplcError {
    fn from(err: figment::Error) -> Self {
        HplcError::Figment(Box::new(err))
    }
}

impl HplcError {
    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// Device error responses are deterministic; transport failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HplcError::Io(_) | HplcError::Timeout { .. } | HplcError::Protocol(_)
        )
    }
}
