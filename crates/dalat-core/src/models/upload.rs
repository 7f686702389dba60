use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::file::UploadFile;
use crate::constants::MAX_PROGRESS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Converting,
    Compressing,
    Uploading,
    Uploaded,
    Error,
}

impl UploadStatus {
    /// Statuses that occupy a concurrency slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            UploadStatus::Converting | UploadStatus::Compressing | UploadStatus::Uploading
        )
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Queued => write!(f, "queued"),
            UploadStatus::Converting => write!(f, "converting"),
            UploadStatus::Compressing => write!(f, "compressing"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Uploaded => write!(f, "uploaded"),
            UploadStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(UploadStatus::Queued),
            "converting" => Ok(UploadStatus::Converting),
            "compressing" => Ok(UploadStatus::Compressing),
            "uploading" => Ok(UploadStatus::Uploading),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "error" => Ok(UploadStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

/// A preprocessing step that replaces an item's payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Conversion,
    Compression,
}

/// Steps already applied to an item's payload. Later attempts skip them.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ProcessedSteps {
    pub converted: bool,
    pub compressed: bool,
}

impl ProcessedSteps {
    pub fn record(&mut self, step: ProcessingStep) {
        match step {
            ProcessingStep::Conversion => self.converted = true,
            ProcessingStep::Compression => self.compressed = true,
        }
    }
}

/// One file's journey through the pipeline.
///
/// `name`, `size`, `is_video` and `created_at` are fixed at enqueue. `file` is the
/// current payload, replaced by conversion and compression; `processed_size` is its
/// size once that has happened.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedUpload {
    pub id: Uuid,
    #[serde(skip)]
    pub file: UploadFile,
    pub name: String,
    pub size: usize,
    pub is_video: bool,
    pub processed: ProcessedSteps,
    pub processed_size: Option<usize>,
    pub status: UploadStatus,
    pub progress: u8,
    pub retry_count: u32,
    /// Last failure message, only present while `status` is `Error`.
    pub error: Option<String>,
    /// An automatic re-enqueue is scheduled for this item.
    pub retry_pending: bool,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub media_url: Option<String>,
    pub video_uid: Option<String>,
    pub playback_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueuedUpload {
    pub fn new(file: UploadFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: file.name.clone(),
            size: file.size(),
            is_video: file.is_video(),
            processed: ProcessedSteps::default(),
            processed_size: None,
            file,
            status: UploadStatus::Queued,
            progress: 0,
            retry_count: 0,
            error: None,
            retry_pending: false,
            preview_url: None,
            thumbnail_url: None,
            media_url: None,
            video_uid: None,
            playback_url: None,
            created_at: Utc::now(),
        }
    }

    /// `Uploaded`, or `Error` with no automatic retry left.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            UploadStatus::Uploaded => true,
            UploadStatus::Error => !self.retry_pending,
            _ => false,
        }
    }

    /// Return a copy with `patch` merged in.
    ///
    /// Leaving the `Error` status clears the error message and any pending retry.
    pub fn apply(&self, patch: &ItemPatch) -> Self {
        let mut next = self.clone();

        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(progress) = patch.progress {
            next.progress = progress.min(MAX_PROGRESS);
        }
        if let Some(retry_count) = patch.retry_count {
            next.retry_count = retry_count;
        }
        if let Some(ref error) = patch.error {
            next.error = error.clone();
        }
        if let Some(retry_pending) = patch.retry_pending {
            next.retry_pending = retry_pending;
        }
        if let Some(ref file) = patch.file {
            next.processed_size = Some(file.size());
            next.file = file.clone();
        }
        if let Some(step) = patch.step {
            next.processed.record(step);
        }
        if let Some(ref preview_url) = patch.preview_url {
            next.preview_url = preview_url.clone();
        }
        if let Some(ref thumbnail_url) = patch.thumbnail_url {
            next.thumbnail_url = thumbnail_url.clone();
        }
        if let Some(ref media_url) = patch.media_url {
            next.media_url = Some(media_url.clone());
        }
        if let Some(ref video_uid) = patch.video_uid {
            next.video_uid = Some(video_uid.clone());
        }
        if let Some(ref playback_url) = patch.playback_url {
            next.playback_url = Some(playback_url.clone());
        }

        if next.status != UploadStatus::Error {
            next.error = None;
            next.retry_pending = false;
        }

        next
    }
}

/// Partial update for a [`QueuedUpload`]. Unset fields are left untouched.
///
/// Nullable attributes use a nested `Option`: `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<String>>,
    pub retry_pending: Option<bool>,
    pub file: Option<UploadFile>,
    pub step: Option<ProcessingStep>,
    pub preview_url: Option<Option<String>>,
    pub thumbnail_url: Option<Option<String>>,
    pub media_url: Option<String>,
    pub video_uid: Option<String>,
    pub playback_url: Option<String>,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: UploadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn retry_pending(mut self, pending: bool) -> Self {
        self.retry_pending = Some(pending);
        self
    }

    pub fn file(mut self, file: UploadFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Replace the payload with the output of `step`.
    pub fn processed(mut self, file: UploadFile, step: ProcessingStep) -> Self {
        self.file = Some(file);
        self.step = Some(step);
        self
    }

    pub fn preview_url(mut self, url: Option<String>) -> Self {
        self.preview_url = Some(url);
        self
    }

    pub fn thumbnail_url(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = Some(url);
        self
    }

    pub fn media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    pub fn video_uid(mut self, uid: Option<String>) -> Self {
        self.video_uid = uid;
        self
    }

    pub fn playback_url(mut self, url: Option<String>) -> Self {
        self.playback_url = url;
        self
    }
}

/// Aggregated counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub converting: usize,
    pub compressing: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Failed items waiting for an automatic retry (also counted in `failed`).
    pub retrying: usize,
}

impl QueueStats {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a QueuedUpload>) -> Self {
        let mut stats = QueueStats::default();
        for item in items {
            stats.total += 1;
            match item.status {
                UploadStatus::Queued => stats.queued += 1,
                UploadStatus::Converting => stats.converting += 1,
                UploadStatus::Compressing => stats.compressing += 1,
                UploadStatus::Uploading => stats.uploading += 1,
                UploadStatus::Uploaded => stats.uploaded += 1,
                UploadStatus::Error => {
                    stats.failed += 1;
                    if item.retry_pending {
                        stats.retrying += 1;
                    }
                }
            }
        }
        stats
    }

    pub fn active(&self) -> usize {
        self.converting + self.compressing + self.uploading
    }

    /// Every item has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.uploaded + (self.failed - self.retrying) == self.total
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0
    }

    pub fn is_uploading(&self) -> bool {
        self.active() > 0
    }

    /// Nothing is queued, running, or waiting for an automatic retry.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.active() == 0 && self.retrying == 0
    }
}
