//! Dalat Processing Library
//!
//! Everything the upload pipeline does to a file before it is stored: validation,
//! format conversion, image and video compression, and local preview handles.
//!
//! Each step is a trait so the queue can be driven by fakes in tests and so a caller
//! can switch a step off (`NoConversion`, `NoCompression`, `NoPreviews`).

pub mod compression;
pub mod conversion;
pub mod error;
pub mod ffmpeg;
pub mod preview;
pub mod validator;
pub mod video;

pub use compression::{ImageCompression, JpegRecompressor, NoCompression};
pub use conversion::{FfmpegConverter, MediaConverter, NoConversion};
pub use error::{ProcessingError, ProcessingResult};
pub use ffmpeg::Ffmpeg;
pub use preview::{NoPreviews, PreviewStore, TempDirPreviews};
pub use validator::{FileValidator, MediaValidator, UploadValidator, ValidationError};
pub use video::{FfmpegVideoCompressor, VideoCompression};
