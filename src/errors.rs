//! Error types for the fan controller

use thiserror::Error;

/// Result type alias for the fan controller
pub type Result<T> = std::result::Result<T, FanControlError>;

/// Main error type for the fan controller
#[derive(Error, Debug)]
pub enum FanControlError {
    #[error("Cannot parse config field {key} from {value:?}")]
    ConfigParse { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Hardware initialization failed: {0}")]
    HardwareInit(String),

    #[error("Hardware operation '{op}' failed: {reason}")]
    Hardware { op: &'static str, reason: String },

    #[error("Cannot read temperature from {path}: {reason}")]
    SensorRead { path: String, reason: String },

    #[error("Signal handling error: {0}")]
    Signal(String),
}

impl FanControlError {
    /// Wrap a failed hardware call, keeping the name of the operation
    pub fn hardware(op: &'static str, err: impl std::fmt::Display) -> Self {
        FanControlError::Hardware {
            op,
            reason: err.to_string(),
        }
    }
}
