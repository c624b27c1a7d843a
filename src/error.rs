//! Error handling for the field relay crate.

use crate::frame::parser::ParseError;

/// A specialized `Result` type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// The main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound frame was rejected by the grammar
    #[error("Frame rejected: {0}")]
    Parse(#[from] ParseError),

    /// Durable queue could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Uplink command could not be run
    #[error("Uplink error: {0}")]
    Uplink(String),

    /// GPIO operation failed (only available with gpio feature)
    #[cfg(feature = "gpio")]
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Mode signal could not be sampled
    #[error("Mode signal error: {0}")]
    Signal(String),

    /// Clock synchronisation failed
    #[error("Clock error: {0}")]
    Clock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Create a new storage error
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new uplink error
    pub fn uplink_error(msg: impl Into<String>) -> Self {
        Self::Uplink(msg.into())
    }

    /// Create a new GPIO error
    #[cfg(feature = "gpio")]
    pub fn gpio_error(msg: impl Into<String>) -> Self {
        Self::Gpio(msg.into())
    }

    /// Create a new mode signal error
    pub fn signal_error(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }

    /// Create a new clock error
    pub fn clock_error(msg: impl Into<String>) -> Self {
        Self::Clock(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
