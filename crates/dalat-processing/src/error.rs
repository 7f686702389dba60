use std::io;

/// Failures of a single processing step.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("FFmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("Invalid executable path: {0}")]
    InvalidExecutable(String),

    #[error("Preview error: {0}")]
    Preview(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    /// Whether running the same step again could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Io(_) | ProcessingError::Join(_))
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;
