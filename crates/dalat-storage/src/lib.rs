//! Dalat Storage Library
//!
//! This crate provides the storage abstraction the upload queue writes to, and its
//! implementations for S3 (and S3-compatible providers) and the local filesystem.
//!
//! # Storage key format
//!
//! Keys are bucket-relative and date-partitioned:
//!
//! - `{yyyy}/{mm}/{uuid}.{ext}`
//! - `{prefix}/{yyyy}/{mm}/{uuid}.{ext}` when a prefix (e.g. an event slug) is given
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the `keys`
//! module so every backend agrees on it.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use dalat_core::StorageBackend;
pub use factory::create_storage;
pub use keys::generate_storage_key;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult, StoredObject, UploadOptions};
