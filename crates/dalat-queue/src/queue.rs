//! Consumer handle for the upload queue.

use dalat_core::config::{Config, QueueConfig};
use dalat_core::models::{QueueStats, QueuedUpload, UploadFile};
use dalat_processing::{
    Ffmpeg, FfmpegConverter, FfmpegVideoCompressor, FileValidator, ImageCompression,
    JpegRecompressor, MediaConverter, NoCompression, NoConversion, NoPreviews, PreviewStore,
    ProcessingResult, TempDirPreviews, UploadValidator, ValidationError, VideoCompression,
};
use dalat_storage::Storage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::controller::{Ack, Command, Controller};
use crate::error::{QueueError, QueueResult};
use crate::pipeline::{Pipeline, UploadTarget};
use crate::state::QueueSnapshot;

/// The services the queue drives. Everything except storage and validation defaults to
/// a pass-through.
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn FileValidator>,
    pub converter: Arc<dyn MediaConverter>,
    pub image_compressor: Arc<dyn ImageCompression>,
    pub video_compressor: Arc<dyn VideoCompression>,
    pub previews: Arc<dyn PreviewStore>,
    pub storage: Arc<dyn Storage>,
}

impl Collaborators {
    pub fn new(storage: Arc<dyn Storage>, validator: Arc<dyn FileValidator>) -> Self {
        Self {
            validator,
            converter: Arc::new(NoConversion),
            image_compressor: Arc::new(NoCompression),
            video_compressor: Arc::new(NoCompression),
            previews: Arc::new(NoPreviews),
            storage,
        }
    }

    /// Real processing stack built from configuration: ffmpeg conversion, mozjpeg and
    /// ffmpeg compression (each switchable off) and temp-dir previews.
    pub fn from_config(config: &Config, storage: Arc<dyn Storage>) -> ProcessingResult<Self> {
        let processing = &config.processing;
        let ffmpeg = Ffmpeg::new(&processing.ffmpeg_path, &processing.ffprobe_path)?;

        let mut collaborators = Self::new(
            storage,
            Arc::new(UploadValidator::from_config(&config.validation)),
        )
        .with_previews(Arc::new(TempDirPreviews::new()?));

        if processing.conversion_enabled {
            collaborators =
                collaborators.with_converter(Arc::new(FfmpegConverter::new(ffmpeg.clone())));
        }
        if processing.compression_enabled {
            collaborators = collaborators
                .with_image_compressor(Arc::new(JpegRecompressor::new(
                    processing.image_compress_threshold_bytes,
                    processing.image_max_dimension,
                    processing.image_jpeg_quality,
                )))
                .with_video_compressor(Arc::new(FfmpegVideoCompressor::new(
                    ffmpeg,
                    processing.video_compress_threshold_bytes,
                    processing.video_target_height,
                    processing.video_crf,
                )));
        }

        Ok(collaborators)
    }

    pub fn with_converter(mut self, converter: Arc<dyn MediaConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_image_compressor(mut self, compressor: Arc<dyn ImageCompression>) -> Self {
        self.image_compressor = compressor;
        self
    }

    pub fn with_video_compressor(mut self, compressor: Arc<dyn VideoCompression>) -> Self {
        self.video_compressor = compressor;
        self
    }

    pub fn with_previews(mut self, previews: Arc<dyn PreviewStore>) -> Self {
        self.previews = previews;
        self
    }
}

/// Result of [`UploadQueue::add_files`].
#[derive(Debug, Default)]
pub struct Enqueued {
    /// Ids of accepted files, in the order they were given.
    pub ids: Vec<Uuid>,
    /// Rejected files by name. They never enter the queue.
    pub rejected: Vec<(String, ValidationError)>,
}

/// Handle to a running upload queue.
///
/// Mutating operations resolve once the controller has applied them, so a read right
/// after an awaited call observes its effect. Dropping the handle shuts the queue down.
pub struct UploadQueue {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<QueueSnapshot>,
    validator: Arc<dyn FileValidator>,
}

impl UploadQueue {
    /// Spawn the controller on the current tokio runtime.
    pub fn new(config: QueueConfig, target: UploadTarget, collaborators: Collaborators) -> Self {
        let Collaborators {
            validator,
            converter,
            image_compressor,
            video_compressor,
            previews,
            storage,
        } = collaborators;

        let pipeline = Arc::new(Pipeline::new(
            converter,
            image_compressor,
            video_compressor,
            storage,
            target,
        ));

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(QueueSnapshot::default());

        let controller = Controller::new(
            &config,
            pipeline,
            previews,
            commands_tx.clone(),
            snapshots_tx,
        );
        tokio::spawn(controller.run(commands_rx));

        Self {
            commands: commands_tx,
            snapshots: snapshots_rx,
            validator,
        }
    }

    async fn request(&self, command: impl FnOnce(Ack) -> Command) -> QueueResult<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .map_err(|_| QueueError::Closed)?;
        done.await.map_err(|_| QueueError::Closed)
    }

    /// Validate and enqueue `files` in order. Duplicates are not detected.
    pub async fn add_files(&self, files: Vec<UploadFile>) -> QueueResult<Enqueued> {
        let mut enqueued = Enqueued::default();
        let mut items = Vec::with_capacity(files.len());

        for file in files {
            match self.validator.validate(&file) {
                Ok(()) => {
                    let item = QueuedUpload::new(file);
                    enqueued.ids.push(item.id);
                    items.push(item);
                }
                Err(e) => {
                    tracing::info!(file.name = %file.name, reason = %e, "File rejected");
                    enqueued.rejected.push((file.name, e));
                }
            }
        }

        if !items.is_empty() {
            self.request(|ack| Command::Add { items, ack }).await?;
        }
        Ok(enqueued)
    }

    /// Remove an item, cancelling its upload if one is running. Unknown ids are ignored.
    pub async fn remove_item(&self, id: Uuid) -> QueueResult<()> {
        self.request(|ack| Command::Remove { id, ack }).await
    }

    /// Re-queue a failed item. Items in any other status are left alone.
    pub async fn retry_item(&self, id: Uuid) -> QueueResult<()> {
        self.request(|ack| Command::Retry { id, ack }).await
    }

    pub async fn retry_all_failed(&self) -> QueueResult<()> {
        self.request(|ack| Command::RetryAllFailed { ack }).await
    }

    /// Stop starting new uploads. Running uploads continue.
    pub async fn pause(&self) -> QueueResult<()> {
        self.request(|ack| Command::Pause { ack }).await
    }

    pub async fn resume(&self) -> QueueResult<()> {
        self.request(|ack| Command::Resume { ack }).await
    }

    /// Drop uploaded items and release their previews.
    pub async fn clear_completed(&self) -> QueueResult<()> {
        self.request(|ack| Command::ClearCompleted { ack }).await
    }

    /// Release every preview and stop the controller. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|ack| Command::Shutdown { ack: Some(ack) })
            .await;
    }

    pub fn items(&self) -> Vec<Arc<QueuedUpload>> {
        self.snapshots.borrow().items.clone()
    }

    pub fn stats(&self) -> QueueStats {
        self.snapshots.borrow().stats
    }

    pub fn is_paused(&self) -> bool {
        self.snapshots.borrow().is_paused
    }

    /// Every item is uploaded or has failed for good.
    pub fn is_complete(&self) -> bool {
        self.snapshots.borrow().is_complete()
    }

    pub fn has_errors(&self) -> bool {
        self.snapshots.borrow().has_errors()
    }

    pub fn is_uploading(&self) -> bool {
        self.snapshots.borrow().is_uploading()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until nothing is queued, running or waiting on a retry timer. A paused queue
    /// with queued items does not settle.
    pub async fn wait_until_settled(&self) -> QueueResult<QueueSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(QueueSnapshot::is_settled)
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(snapshot.clone())
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown { ack: None });
    }
}
