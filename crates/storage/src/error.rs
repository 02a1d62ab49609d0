//! Storage and outbound HTTP errors

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob location: {0}")]
    InvalidLocation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure: connect, timeout, TLS
    #[error("Network error during {operation}: {message}")]
    Network { operation: String, message: String },

    /// The remote answered with a non-success status
    #[error("{operation} failed with status {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response of {operation}: {message}")]
    Decode { operation: String, message: String },
}

impl StorageError {
    pub fn from_reqwest(operation: impl Into<String>, source: reqwest::Error) -> Self {
        let operation = operation.into();
        if source.is_decode() {
            StorageError::Decode {
                operation,
                message: source.to_string(),
            }
        } else {
            StorageError::Network {
                operation,
                message: source.to_string(),
            }
        }
    }

    /// Transport failures may succeed when repeated; nothing here retries
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network { .. } => true,
            StorageError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
