//! The work done for one item once it holds a slot: convert, compress, upload.

use chrono::Utc;
use dalat_core::config::StorageConfig;
use dalat_core::models::{ProcessedSteps, ProcessingStep, UploadFile, UploadStatus};
use dalat_core::{ErrorMetadata, UploadError};
use dalat_processing::{ImageCompression, MediaConverter, VideoCompression};
use dalat_storage::{generate_storage_key, Storage, StorageError, StoredObject, UploadOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::controller::Command;

const VIDEO_PROGRESS_BUFFER: usize = 16;

/// Where and how processed files are stored.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub cache_control: Option<String>,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: None,
            cache_control: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
            cache_control: Some("public, max-age=31536000, immutable".to_string()),
        }
    }
}

/// Progress reported by a running pipeline. `attempt` identifies the dispatch that
/// produced the event, so the controller can drop events from a superseded run.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Phase {
        id: Uuid,
        attempt: u64,
        status: UploadStatus,
    },
    Progress {
        id: Uuid,
        attempt: u64,
        progress: u8,
    },
    FileReplaced {
        id: Uuid,
        attempt: u64,
        file: UploadFile,
        step: ProcessingStep,
    },
    Uploaded {
        id: Uuid,
        attempt: u64,
        stored: StoredObject,
    },
    Failed {
        id: Uuid,
        attempt: u64,
        error: UploadError,
    },
}

impl WorkerEvent {
    pub(crate) fn id(&self) -> Uuid {
        match self {
            WorkerEvent::Phase { id, .. }
            | WorkerEvent::Progress { id, .. }
            | WorkerEvent::FileReplaced { id, .. }
            | WorkerEvent::Uploaded { id, .. }
            | WorkerEvent::Failed { id, .. } => *id,
        }
    }

    pub(crate) fn attempt(&self) -> u64 {
        match self {
            WorkerEvent::Phase { attempt, .. }
            | WorkerEvent::Progress { attempt, .. }
            | WorkerEvent::FileReplaced { attempt, .. }
            | WorkerEvent::Uploaded { attempt, .. }
            | WorkerEvent::Failed { attempt, .. } => *attempt,
        }
    }
}

/// Sends events for one dispatch back to the controller.
struct Reporter {
    id: Uuid,
    attempt: u64,
    events: mpsc::UnboundedSender<Command>,
}

impl Reporter {
    fn send(&self, event: WorkerEvent) {
        // the controller is gone after shutdown; detached work just finishes quietly
        let _ = self.events.send(Command::Worker(event));
    }

    fn phase(&self, status: UploadStatus) {
        self.send(WorkerEvent::Phase {
            id: self.id,
            attempt: self.attempt,
            status,
        });
    }

    fn progress(&self, progress: u8) {
        self.send(WorkerEvent::Progress {
            id: self.id,
            attempt: self.attempt,
            progress,
        });
    }

    fn file_replaced(&self, file: UploadFile, step: ProcessingStep) {
        self.send(WorkerEvent::FileReplaced {
            id: self.id,
            attempt: self.attempt,
            file,
            step,
        });
    }
}

pub struct Pipeline {
    converter: Arc<dyn MediaConverter>,
    image_compressor: Arc<dyn ImageCompression>,
    video_compressor: Arc<dyn VideoCompression>,
    storage: Arc<dyn Storage>,
    target: UploadTarget,
}

impl Pipeline {
    pub fn new(
        converter: Arc<dyn MediaConverter>,
        image_compressor: Arc<dyn ImageCompression>,
        video_compressor: Arc<dyn VideoCompression>,
        storage: Arc<dyn Storage>,
        target: UploadTarget,
    ) -> Self {
        Self {
            converter,
            image_compressor,
            video_compressor,
            storage,
            target,
        }
    }

    fn needs_compression(&self, file: &UploadFile) -> bool {
        if file.is_video() {
            self.video_compressor.should_compress(file)
        } else if file.is_image() {
            self.image_compressor.should_compress(file)
        } else {
            false
        }
    }

    fn needs_conversion(&self, file: &UploadFile, done: ProcessedSteps) -> bool {
        !done.converted && self.converter.needs_conversion(file)
    }

    /// Status an item enters when it is given a slot. Steps in `done` already ran on
    /// an earlier attempt and are not repeated.
    pub fn first_phase(&self, file: &UploadFile, done: ProcessedSteps) -> UploadStatus {
        if self.needs_conversion(file, done) {
            UploadStatus::Converting
        } else if !done.compressed && self.needs_compression(file) {
            UploadStatus::Compressing
        } else {
            UploadStatus::Uploading
        }
    }

    /// Run the pipeline for one dispatch. Never fails: the outcome is reported as an
    /// `Uploaded` or `Failed` event, and nothing is reported once `cancel` fires.
    #[tracing::instrument(skip(self, file, done, events, cancel), fields(item.id = %id, attempt = attempt, file.name = %file.name))]
    pub(crate) async fn run(
        &self,
        id: Uuid,
        attempt: u64,
        file: UploadFile,
        done: ProcessedSteps,
        events: mpsc::UnboundedSender<Command>,
        cancel: CancellationToken,
    ) {
        let reporter = Reporter {
            id,
            attempt,
            events,
        };
        let start = std::time::Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = self.process(file, done, &reporter) => result,
        };

        match result {
            Ok(stored) => {
                tracing::info!(
                    key = %stored.key,
                    duration_ms = start.elapsed().as_millis(),
                    "Upload finished"
                );
                reporter.send(WorkerEvent::Uploaded {
                    id,
                    attempt,
                    stored,
                });
            }
            Err(UploadError::Cancelled) => {
                tracing::debug!("Pipeline cancelled");
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    error_code = error.error_code(),
                    recoverable = error.is_recoverable(),
                    duration_ms = start.elapsed().as_millis(),
                    "Upload attempt failed"
                );
                reporter.send(WorkerEvent::Failed { id, attempt, error });
            }
        }
    }

    async fn process(
        &self,
        mut file: UploadFile,
        done: ProcessedSteps,
        reporter: &Reporter,
    ) -> Result<StoredObject, UploadError> {
        if self.needs_conversion(&file, done) {
            reporter.phase(UploadStatus::Converting);
            file = self
                .converter
                .convert(&file)
                .await
                .map_err(|e| UploadError::Conversion(e.to_string()))?;
            reporter.file_replaced(file.clone(), ProcessingStep::Conversion);
        }

        if !done.compressed && self.needs_compression(&file) {
            reporter.phase(UploadStatus::Compressing);
            file = if file.is_video() {
                self.compress_video(&file, reporter).await?
            } else {
                self.image_compressor
                    .compress(&file)
                    .await
                    .map_err(|e| UploadError::Compression(e.to_string()))?
            };
            reporter.file_replaced(file.clone(), ProcessingStep::Compression);
        }

        reporter.phase(UploadStatus::Uploading);
        self.upload(&file).await
    }

    async fn compress_video(
        &self,
        file: &UploadFile,
        reporter: &Reporter,
    ) -> Result<UploadFile, UploadError> {
        let (progress_tx, mut progress_rx) = mpsc::channel(VIDEO_PROGRESS_BUFFER);

        let forward = async {
            while let Some(progress) = progress_rx.recv().await {
                reporter.progress(progress);
            }
        };
        let compress = self.video_compressor.compress(file, progress_tx);

        // the compressor owns the sender, so forwarding ends when it returns
        let (result, ()) = tokio::join!(compress, forward);
        result.map_err(|e| UploadError::Compression(e.to_string()))
    }

    async fn upload(&self, file: &UploadFile) -> Result<StoredObject, UploadError> {
        let key = generate_storage_key(
            self.target.key_prefix.as_deref(),
            Uuid::new_v4(),
            &file.extension(),
            Utc::now(),
        );
        let options = UploadOptions {
            cache_control: self.target.cache_control.clone(),
            upsert: false,
        };

        self.storage
            .upload(
                &self.target.bucket,
                &key,
                &file.content_type,
                file.data.clone(),
                &options,
            )
            .await
            .map_err(storage_error)
    }
}

fn storage_error(error: StorageError) -> UploadError {
    if error.is_transient() {
        UploadError::Storage(error.to_string())
    } else {
        UploadError::StorageRejected(error.to_string())
    }
}
