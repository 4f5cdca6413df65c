//! Execution Engine Error Types

use thiserror::Error;

/// Main error type for the execution engine
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Encryption key rejected: {0}")]
    Key(String),

    #[error("Cipher operation failed: {0}")]
    Cipher(String),

    #[error("File preprocessing failed: {0}")]
    Preprocess(String),

    #[error("Runner invocation failed: {0}")]
    Runner(String),

    #[error("Evidence update failed: {0}")]
    Evidence(String),

    #[error("Duplicate resolution error: {0}")]
    Duplicates(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::Serialization(err.to_string())
    }
}

/// Result type alias for execution engine operations
pub type ExecResult<T> = Result<T, ExecutionError>;
