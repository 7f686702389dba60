use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The controller has shut down; the operation was not applied.
    #[error("Upload queue is shut down")]
    Closed,
}

pub type QueueResult<T> = Result<T, QueueError>;
