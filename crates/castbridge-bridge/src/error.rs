/*!
 * Error types for the castbridge bridge crate.
 */
use thiserror::Error;

/// Error type for bridge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] castbridge_devices::DeviceError),

    /// Bus error
    #[error("Bus error: {0}")]
    Bus(#[from] castbridge_devices::BusError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] castbridge_core::error::Error),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new session error
    pub fn session<S: AsRef<str>>(msg: S) -> Self {
        Error::Session(msg.as_ref().to_string())
    }
}
