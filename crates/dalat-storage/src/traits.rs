//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_)
                | StorageError::BackendError(_)
                | StorageError::IoError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Per-upload options.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// `Cache-Control` value stored with the object, when the backend supports it.
    pub cache_control: Option<String>,
    /// Overwrite an existing object at the same key instead of failing.
    pub upsert: bool,
}

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
    /// Set by video-hosting backends that assign their own identifier.
    pub video_uid: Option<String>,
    /// Set by video-hosting backends that serve an adaptive playback URL.
    pub playback_url: Option<String>,
}

impl StoredObject {
    pub fn new(key: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            public_url: public_url.into(),
            video_uid: None,
            playback_url: None,
        }
    }
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem) must implement this trait so the
/// upload queue can work with any of them without knowing which one it talks to.
///
/// **Key format:** keys are bucket-relative, see the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload `data` to `key` inside `bucket` and return where it landed.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> StorageResult<StoredObject>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Reject keys that could escape their bucket.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Reject bucket names that are not a single path segment.
pub(crate) fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty()
        || bucket.contains("..")
        || bucket.contains('/')
        || bucket.contains('\\')
    {
        return Err(StorageError::InvalidKey(format!(
            "Invalid bucket name: {}",
            bucket
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::UploadFailed("timeout".into()).is_transient());
        assert!(StorageError::BackendError("503".into()).is_transient());
        assert!(!StorageError::AlreadyExists("k".into()).is_transient());
        assert!(!StorageError::InvalidKey("k".into()).is_transient());
        assert!(!StorageError::ConfigError("c".into()).is_transient());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("2026/10/a.jpg").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_bucket() {
        assert!(validate_bucket("moments").is_ok());
        assert!(validate_bucket("a/b").is_err());
        assert!(validate_bucket("..").is_err());
    }
}
