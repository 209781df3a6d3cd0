//! Error types for the OTA catalog.
//!
//! Decode and validation failures are plain values returned to the caller.
//! Filesystem failures carry the offending path when one is known.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the OTA catalog.
#[derive(Debug, Error)]
pub enum OtaError {
    // Image decoding errors
    #[error("Not a valid OTA file: invalid upgrade file identifier")]
    InvalidMagic,

    #[error("Not a valid OTA file: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("Image size mismatch: header declares {declared} bytes, elements account for {computed}")]
    SizeMismatch { declared: u64, computed: u64 },

    // Metadata errors
    #[error("Invalid format for '{field}', expected '{expected}' type")]
    InvalidExtraMeta {
        field: String,
        expected: &'static str,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Catalog is locked by another process: {0}")]
    Locked(PathBuf),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, OtaError>;

impl From<std::io::Error> for OtaError {
    fn from(err: std::io::Error) -> Self {
        OtaError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(err: serde_json::Error) -> Self {
        OtaError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl OtaError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        OtaError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an extra-meta validation error for `field`.
    pub fn invalid_extra_meta(field: impl Into<String>, expected: &'static str) -> Self {
        OtaError::InvalidExtraMeta {
            field: field.into(),
            expected,
        }
    }

    /// True for errors produced while decoding an image (header or size checks).
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            OtaError::InvalidMagic | OtaError::TooShort { .. } | OtaError::SizeMismatch { .. }
        )
    }

    /// Check if this error should trigger a retry.
    ///
    /// The catalog never retries on its own; nothing it produces is transient.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
