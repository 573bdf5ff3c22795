//! Custom error types for the application.
//!
//! This module defines the primary error type, `GradError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure modes of a gradiometer session:
//! configuration problems, hardware faults surfaced by the driver, malformed
//! operator input, and persistence failures.
//!
//! Hardware faults are always carried as a message rather than a nested error
//! type: the driver boundary is an `async_trait` returning `anyhow::Result`,
//! and every call site wraps the failure into [`GradError::Hardware`] so the
//! run machinery can record it and release its busy guard instead of killing
//! the worker silently.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type GradResult<T> = std::result::Result<T, GradError>;

#[derive(Error, Debug)]
pub enum GradError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A run is already in progress")]
    RunActive,

    #[error("Gradiometer is already claimed by this process")]
    DeviceAlreadyClaimed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl GradError {
    /// Wrap a driver-level failure into the application error type.
    pub fn hardware(err: impl std::fmt::Display) -> Self {
        GradError::Hardware(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_wrapper_preserves_message() {
        let err = GradError::hardware(anyhow::anyhow!("motor stalled"));
        assert_eq!(err.to_string(), "Hardware error: motor stalled");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GradError = io.into();
        assert!(matches!(err, GradError::Io(_)));
    }
}
