/*!
 * Error types for the Orrery hub crate.
 */
use thiserror::Error;

/// Error type for hub operations
#[derive(Error, Debug)]
pub enum Error {
    /// The hub was closed
    #[error("Hub closed: {0}")]
    Closed(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] orrery_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] orrery_core::error::Error),
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new closed error
    pub fn closed<S: AsRef<str>>(msg: S) -> Self {
        Error::Closed(msg.as_ref().to_string())
    }
}
