//! Data models for the upload queue
//!
//! `file` holds the raw payload handed to the queue, `upload` the per-item state
//! machine and the aggregate statistics derived from it.

mod file;
mod upload;

pub use file::*;
pub use upload::*;
