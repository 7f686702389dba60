//! Dalat Queue Library
//!
//! A bounded-concurrency upload queue. Files are validated on entry, then each one is
//! taken through conversion, compression and upload while at most `max_concurrent`
//! items are in flight. Failed items are retried on a delay schedule, the queue can be
//! paused and resumed, and local preview handles are released exactly once.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use dalat_core::config::QueueConfig;
//! # use dalat_queue::{Collaborators, UploadQueue, UploadTarget};
//! # async fn run(collaborators: Collaborators, files: Vec<dalat_core::UploadFile>) {
//! let queue = UploadQueue::new(QueueConfig::default(), UploadTarget::new("moments"), collaborators);
//! let enqueued = queue.add_files(files).await.unwrap();
//! let settled = queue.wait_until_settled().await.unwrap();
//! println!("{} uploaded, {} rejected", settled.stats.uploaded, enqueued.rejected.len());
//! queue.shutdown().await;
//! # }
//! ```

mod controller;
pub mod error;
pub mod pipeline;
mod previews;
pub mod queue;
pub mod retry;
pub mod state;

pub use error::{QueueError, QueueResult};
pub use pipeline::UploadTarget;
pub use queue::{Collaborators, Enqueued, UploadQueue};
pub use retry::{FailureClassification, ManualRetryBudget, RetryDecision, RetryPolicy};
pub use state::{reduce, QueueAction, QueueSnapshot, QueueState};
