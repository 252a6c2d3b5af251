//! Common types for amplifier drivers

use eeg_types::SubsystemError;
use thiserror::Error;

/// Status of an amplifier driver
#[derive(Debug, Clone, PartialEq)]
pub enum AmplifierStatus {
    /// Driver is not initialized
    NotInitialized,
    /// Connected and ready, not yet acquiring
    Ok,
    /// Driver is actively acquiring data
    Running,
    /// Acquisition ended after a stop request
    Stopped,
    /// Driver encountered an error
    Error(String),
}

/// Errors that can occur in amplifier drivers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// Hardware not found or already claimed
    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),
    /// Acquisition error
    #[error("Acquisition error: {0}")]
    AcquisitionError(String),
    /// Driver not initialized
    #[error("Driver not initialized")]
    NotInitialized,
    /// Not enough buffered samples for the request
    #[error("Requested {requested} samples, only {available} buffered")]
    InsufficientSamples { requested: usize, available: usize },
}

impl From<DriverError> for SubsystemError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::InsufficientSamples {
                requested,
                available,
            } => SubsystemError::InsufficientSamples {
                requested,
                available,
            },
            DriverError::HardwareNotFound(msg) => SubsystemError::HardwareFault(msg),
            DriverError::AcquisitionError(msg) => SubsystemError::Disconnected(msg),
            other => SubsystemError::HardwareFault(other.to_string()),
        }
    }
}
