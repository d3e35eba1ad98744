//! Error types for Metricstore
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for Metricstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Metricstore
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // Record errors
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid field path: {0}")]
    InvalidPath(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Command pipeline errors
    #[error("command queue is closed")]
    QueueClosed,

    #[error("command was dropped before completion")]
    CommandDropped,

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid timestamp error
    pub fn invalid_timestamp(msg: impl Into<String>) -> Self {
        Self::InvalidTimestamp(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error came from the disk or the segment codec
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::StorageIo(_) | Self::Storage(_))
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueClosed)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::QueueClosed.is_retryable());
        assert!(!Error::storage("test").is_retryable());
        assert!(!Error::invalid_timestamp("test").is_retryable());
    }

    #[test]
    fn test_error_is_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::from(io).is_io());
        assert!(Error::storage("broken").is_io());
        assert!(!Error::QueueClosed.is_io());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::invalid_timestamp("missing field").to_string(),
            "invalid timestamp: missing field"
        );
        assert_eq!(Error::QueueClosed.to_string(), "command queue is closed");
    }
}
