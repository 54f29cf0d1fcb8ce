//! Unified error hierarchy for lactrs
//!
//! Numeric edge cases in the engine degrade to `None` thresholds or skipped
//! tests and never surface here. Errors are reserved for caller mistakes
//! (unknown method tags, invalid parameters) and the storage boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all lactrs operations
#[derive(Debug, Error)]
pub enum LactrsError {
    /// Threshold method tag that does not name a known algorithm
    #[error("Unknown threshold method: {tag}")]
    UnknownMethod { tag: String },

    /// Zone model tag that does not name a known model
    #[error("Unknown zone model: {tag}")]
    UnknownZoneModel { tag: String },

    /// Calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Stage, threshold and zone storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stage file input errors
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalculationError {
    /// Parameter outside its valid range
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },

    /// Not enough usable data to compute a result
    #[error("Insufficient data for {calculation}: {reason}")]
    InsufficientData { calculation: String, reason: String },
}

impl CalculationError {
    pub(crate) fn invalid(calculation: &str, parameter: &str, value: impl ToString) -> Self {
        CalculationError::InvalidParameter {
            calculation: calculation.to_string(),
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }
}

/// Storage collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Row missing from a store table
    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },

    /// Stage amendment on a test that has been closed
    #[error("Test {test_id} is closed; stage {stage} cannot be changed")]
    TestClosed { test_id: String, stage: u32 },

    /// Stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stage file input errors
#[derive(Debug, Error)]
pub enum InputError {
    /// Unsupported file format
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// File could not be parsed
    #[error("Parse error in {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },
}

/// Result type alias for lactrs operations
pub type Result<T> = std::result::Result<T, LactrsError>;

impl LactrsError {
    /// True when retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LactrsError::Storage(StorageError::Sqlite(rusqlite::Error::SqliteFailure(_, _)))
                | LactrsError::Io(_)
        )
    }

    /// How serious the error is for the running command
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LactrsError::Storage(StorageError::NotFound { .. }) => ErrorSeverity::Warning,
            LactrsError::Storage(StorageError::TestClosed { .. }) => ErrorSeverity::Warning,
            LactrsError::Input(_) => ErrorSeverity::Warning,
            LactrsError::UnknownMethod { .. } => ErrorSeverity::Error,
            LactrsError::UnknownZoneModel { .. } => ErrorSeverity::Error,
            LactrsError::Storage(StorageError::Serialization(_)) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Message shown to CLI users
    pub fn user_message(&self) -> String {
        match self {
            LactrsError::UnknownMethod { tag } => format!(
                "'{}' is not a supported threshold method. Use one of: dickhuth, mader, dmax, modified-dmax, adjusted.",
                tag
            ),
            LactrsError::UnknownZoneModel { tag } => format!(
                "'{}' is not a supported zone model. Use one of: 5-zones, 3-zones-a, 3-zones-b.",
                tag
            ),
            LactrsError::Storage(StorageError::TestClosed { test_id, .. }) => {
                format!("Test {} has been closed and can no longer be edited.", test_id)
            }
            LactrsError::Storage(StorageError::NotFound { table, id }) => {
                format!("No {} entry found for {}.", table, id)
            }
            _ => self.to_string(),
        }
    }
}

/// Severity attached to every `LactrsError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Stored data is unreadable
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Level used when the error is logged
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = LactrsError::Storage(StorageError::NotFound {
            table: "stages".to_string(),
            id: "t-1".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = LactrsError::UnknownMethod {
            tag: "guess".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_retryable() {
        let err = LactrsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_retryable());

        let err = LactrsError::Configuration("bad".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = LactrsError::UnknownMethod {
            tag: "lt-magic".to_string(),
        };
        assert!(err.user_message().contains("lt-magic"));
        assert!(err.user_message().contains("dickhuth"));

        let err = LactrsError::Storage(StorageError::TestClosed {
            test_id: "t-9".to_string(),
            stage: 4,
        });
        assert!(err.user_message().contains("closed"));
    }
}
