//! Error types for FileCrypt
//!
//! This module defines all error types used throughout the crate,
//! from container parsing failures up to request-level rejections.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for FileCrypt operations
#[derive(Error, Debug)]
pub enum FileCryptError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Algorithm identifier outside the supported set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Token tag did not verify
    #[error("Authentication failed: token signature does not match")]
    AuthenticationFailure,

    /// Block padding was invalid after decryption
    #[error("Padding error: {0}")]
    PaddingError(String),

    /// Container framing could not be parsed
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Key material could not be generated, parsed or unwrapped
    #[error("Key error: {0}")]
    KeyError(String),

    /// Caller supplied an unusable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload exceeds the configured limit
    #[error("Input too large: {size} bytes exceeds limit of {limit} bytes")]
    InputTooLarge { size: u64, limit: u64 },

    /// Cipher work did not finish before the deadline
    #[error("Operation timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    /// Cipher pool queue is full
    #[error("Server busy: cipher queue is full")]
    Busy,

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Engine returned but the expected artifact is absent
    #[error("Output file not found after processing: {0}")]
    OutputMissing(PathBuf),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FileCryptError>,
    },
}

impl FileCryptError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a padding error
    pub fn padding(message: impl Into<String>) -> Self {
        Self::PaddingError(message.into())
    }

    /// Create a malformed container error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedContainer(message.into())
    }

    /// Create a key error
    pub fn key(message: impl Into<String>) -> Self {
        Self::KeyError(message.into())
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &FileCryptError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is transient (the caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self.root(), Self::Busy | Self::Timeout(_))
    }

    /// Check if this error was caused by the wrong key or a damaged container
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::AuthenticationFailure
                | Self::PaddingError(_)
                | Self::MalformedContainer(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::NotFound(path) | Self::OutputMissing(path) => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for FileCrypt operations
pub type Result<T> = std::result::Result<T, FileCryptError>;

impl From<std::io::Error> for FileCryptError {
    fn from(err: std::io::Error) -> Self {
        FileCryptError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error, mapping `NotFound` to [`FileCryptError::NotFound`]
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            let path = path.into();
            if e.kind() == std::io::ErrorKind::NotFound {
                FileCryptError::NotFound(path)
            } else {
                FileCryptError::io(path, e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Result<()> = Err(io_err).with_path("/test/path");
        let err = err.unwrap_err();
        assert!(matches!(err, FileCryptError::Io { .. }));
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Err::<(), _>(io_err).with_path("/missing").unwrap_err();
        assert!(matches!(err, FileCryptError::NotFound(_)));
    }

    #[test]
    fn test_error_classification() {
        assert!(FileCryptError::Busy.is_recoverable());
        assert!(FileCryptError::Timeout(Duration::from_secs(3)).is_recoverable());
        assert!(!FileCryptError::AuthenticationFailure.is_recoverable());

        let wrapped = FileCryptError::padding("bad pad").with_context("decrypting report.pdf.enc");
        assert!(wrapped.is_decryption_failure());
        assert!(matches!(wrapped.root(), FileCryptError::PaddingError(_)));
    }

    #[test]
    fn test_timeout_message_is_human_readable() {
        let err = FileCryptError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "Operation timed out after 1m 30s");
    }
}
