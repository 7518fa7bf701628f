//! Error types for the Portcullis daemon

use thiserror::Error;

use crate::sensor::SensorFault;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Credential store or enrollment tracker error
    #[error("Core error: {0}")]
    Core(#[from] portcullis_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fingerprint sensor error
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorFault),

    /// The controller task is gone
    #[error("Controller stopped")]
    ControllerStopped,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
