//! Dalat Core Library
//!
//! This crate provides the domain models, error types, configuration and constants
//! shared by every component of the upload pipeline.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, QueueConfig};
pub use error::{ErrorMetadata, LogLevel, UploadError};
pub use models::{ItemPatch, QueueStats, QueuedUpload, UploadFile, UploadStatus};
pub use storage_types::StorageBackend;
