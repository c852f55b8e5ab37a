use std::io;
use thiserror::Error;

/// Error reported by an object storage client
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("{operation} failed with status {status}: {message}")]
    Service {
        operation: &'static str,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Multipart upload of {key} failed: {message}")]
    MultipartUpload { key: String, message: String },

    #[error("Bulk delete under {prefix} failed for {} object(s): {message}", .failed.len())]
    DeleteMultiple {
        prefix: String,
        failed: Vec<String>,
        message: String,
    },

    #[error("{operation} transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn not_found(key: impl Into<String>) -> Self {
        ProviderError::NotFound { key: key.into() }
    }

    /// HTTP-like status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::NotFound { .. } => Some(404),
            ProviderError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Main error type for adapter operations
///
/// Expected outcomes (missing objects, failed multipart uploads, failed bulk
/// deletes) are reported as values by the adapter; only conditions it cannot
/// recover from end up here.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AdapterError {
    /// Status code of the underlying provider error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::Provider(e) => e.status(),
            _ => None,
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;
