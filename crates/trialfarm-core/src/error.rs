//! Error types for trialfarm

use thiserror::Error;

/// Main error type for trialfarm
#[derive(Error, Debug)]
pub enum FarmError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error (remote host could not be reached or the command failed to run)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Trial report did not satisfy the result contract
    #[error("Report error: {0}")]
    Report(String),

    /// Scheduler error (the run could not be driven to completion)
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for trialfarm operations
pub type FarmResult<T> = Result<T, FarmError>;

impl From<serde_json::Error> for FarmError {
    fn from(err: serde_json::Error) -> Self {
        FarmError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FarmError {
    fn from(err: toml::de::Error) -> Self {
        FarmError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FarmError::Config("empty worker pool".to_string());
        assert_eq!(err.to_string(), "Configuration error: empty worker pool");

        let err = FarmError::Report("missing running time".to_string());
        assert_eq!(err.to_string(), "Report error: missing running time");

        let err = FarmError::Scheduler("result queue closed".to_string());
        assert_eq!(err.to_string(), "Scheduler error: result queue closed");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FarmError = io_err.into();
        assert!(matches!(err, FarmError::Io(_)));
    }

    #[test]
    fn test_error_from_toml() {
        let err: FarmError = toml::from_str::<toml::Value>("[[broken")
            .unwrap_err()
            .into();
        assert!(matches!(err, FarmError::Config(_)));
    }
}
