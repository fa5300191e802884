//! Error types for the STI data services.

use thiserror::Error;

/// Result type alias using StiError.
pub type StiResult<T> = Result<T, StiError>;

/// Primary error type for STI data operations.
#[derive(Debug, Error)]
pub enum StiError {
    // === Acquisition Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt artifact: {0}")]
    Corrupt(String),

    #[error("Timed out after {waited_secs}s waiting for lock {path}")]
    LockTimeout { path: String, waited_secs: u64 },

    #[error("Storage error: {0}")]
    StorageError(String),

    // === Data Errors ===
    #[error("Failed to read data: {0}")]
    DataReadError(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Variable '{preferred}' not found and no unambiguous fallback. Available: {candidates:?}")]
    VariableMissing {
        preferred: String,
        candidates: Vec<String>,
    },

    // === Request Errors ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl StiError {
    /// Whether the caller may retry the same request unchanged.
    ///
    /// Only lock-wait exhaustion qualifies; everything else either
    /// already retried internally or will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StiError::LockTimeout { .. })
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            StiError::InvalidInput(_) => 400,
            StiError::NotFound(_) => 404,
            StiError::LockTimeout { .. } => 503,
            _ => 500,
        }
    }
}
