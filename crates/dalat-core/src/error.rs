//! Error types module
//!
//! `UploadError` is the flat failure taxonomy of the upload pipeline. Validation
//! rejections never reach it in practice (rejected files never enter the queue), but
//! the variant exists so collaborators that validate late can still report through it.
//! Everything that fails while an item is being processed ends up here and is turned
//! into item state by the queue; nothing escapes to the caller.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like network hiccups
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be treated and reported.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "STORAGE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error may succeed if the same work is attempted again
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage rejected upload: {0}")]
    StorageRejected(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        UploadError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Internal(format!("IO error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn upload_error_static_metadata(err: &UploadError) -> (&'static str, bool, LogLevel) {
    match err {
        UploadError::Validation(_) => ("VALIDATION_ERROR", false, LogLevel::Debug),
        UploadError::Conversion(_) => ("CONVERSION_ERROR", false, LogLevel::Warn),
        UploadError::Compression(_) => ("COMPRESSION_ERROR", true, LogLevel::Warn),
        UploadError::Storage(_) => ("STORAGE_ERROR", true, LogLevel::Warn),
        UploadError::StorageRejected(_) => ("STORAGE_REJECTED", false, LogLevel::Warn),
        UploadError::Cancelled => ("CANCELLED", false, LogLevel::Debug),
        UploadError::Internal(_) => ("INTERNAL_ERROR", true, LogLevel::Error),
        UploadError::InternalWithSource { .. } => ("INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl UploadError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for UploadError {
    fn error_code(&self) -> &'static str {
        upload_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        upload_error_static_metadata(self).1
    }

    fn log_level(&self) -> LogLevel {
        upload_error_static_metadata(self).2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_storage() {
        let err = UploadError::Storage("connection reset".to_string());
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
        assert_eq!(err.to_string(), "Storage error: connection reset");
    }

    #[test]
    fn test_error_metadata_permanent_failures() {
        assert!(!UploadError::Validation("empty".into()).is_recoverable());
        assert!(!UploadError::StorageRejected("413".into()).is_recoverable());
        assert!(!UploadError::Conversion("bad heic".into()).is_recoverable());
        assert!(!UploadError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_from_anyhow_keeps_chain() {
        let inner = anyhow::anyhow!("disk full").context("writing temp file");
        let err = UploadError::from(inner);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        let details = err.detailed_message();
        assert!(details.contains("writing temp file"));
    }
}
