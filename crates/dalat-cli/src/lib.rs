//! Support code for the `dalat-upload` binary: tracing setup, file collection, batched
//! loading and the JSON summary printed when the queue settles.

use anyhow::Context;
use dalat_core::models::{
    content_type_for_name, QueueStats, QueuedUpload, UploadFile, UploadStatus,
};
use dalat_processing::ValidationError;
use dalat_queue::{QueueSnapshot, UploadQueue};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Files read from disk at the same time while loading.
const LOAD_CONCURRENCY: usize = 8;

/// Smallest number of files read into memory per batch.
pub const MIN_LOAD_BATCH: usize = 8;

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Shorten a file name to `max_len` characters for log lines, keeping the extension
/// readable by cutting from the middle.
pub fn short_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        return name.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let keep = max_len - 3;
    let tail = keep / 2;
    let head = keep - tail;
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}...{}", start, end)
}

/// Expand `paths` into a sorted, de-duplicated list of files. Directories are walked
/// only when `recursive` is set and are otherwise skipped with a warning. Hidden
/// entries inside directories are ignored.
pub async fn collect_files(paths: &[PathBuf], recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = paths.to_vec();

    while let Some(path) = pending.pop() {
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;

        if metadata.is_file() {
            files.push(path);
            continue;
        }
        if !metadata.is_dir() {
            continue;
        }
        if !recursive {
            tracing::warn!(path = %path.display(), "Skipping directory, pass --recursive to include it");
            continue;
        }

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("Cannot list {}", path.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if !is_hidden(&entry.path()) {
                pending.push(entry.path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Read a file into an `UploadFile`, guessing its content type from the extension.
pub async fn load_file(path: &Path) -> anyhow::Result<UploadFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?
        .to_string();
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let content_type = content_type_for_name(&name);
    Ok(UploadFile::new(name, content_type, data.into()))
}

/// Load every file, keeping the input order. Fails on the first unreadable file.
pub async fn load_files(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadFile>> {
    stream::iter(paths)
        .map(|path| load_file(path))
        .buffered(LOAD_CONCURRENCY)
        .try_collect()
        .await
}

/// Paths waiting to be read, handed out in batches so only a bounded number of
/// payloads sits in memory at once.
#[derive(Debug)]
pub struct PendingFiles {
    paths: VecDeque<PathBuf>,
    batch_size: usize,
}

impl PendingFiles {
    pub fn new(paths: Vec<PathBuf>, batch_size: usize) -> Self {
        Self {
            paths: paths.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load the next batch, in order. Empty once every path has been handed out.
    pub async fn next_batch(&mut self) -> anyhow::Result<Vec<UploadFile>> {
        let count = self.batch_size.min(self.paths.len());
        let batch: Vec<PathBuf> = self.paths.drain(..count).collect();
        load_files(&batch).await
    }

    /// Give up on the remaining paths, returning how many there were.
    pub fn abandon(&mut self) -> usize {
        let remaining = self.paths.len();
        self.paths.clear();
        remaining
    }
}

/// Resolve once fewer than `limit` items wait for a slot.
pub async fn backlog_below(queue: &UploadQueue, limit: usize) -> anyhow::Result<()> {
    let mut updates = queue.subscribe();
    updates
        .wait_for(|snapshot| snapshot.stats.queued < limit)
        .await
        .context("Upload queue closed")?;
    Ok(())
}

/// Move uploaded items out of the queue, keeping their summaries, so their payloads
/// are freed.
pub async fn retire_uploaded(
    queue: &UploadQueue,
    finished: &mut Vec<ItemSummary>,
) -> anyhow::Result<()> {
    let uploaded = queue
        .items()
        .into_iter()
        .filter(|item| item.status == UploadStatus::Uploaded);
    for item in uploaded {
        queue.remove_item(item.id).await?;
        finished.push(ItemSummary::from(item.as_ref()));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub name: String,
    pub status: UploadStatus,
    pub size: usize,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&QueuedUpload> for ItemSummary {
    fn from(item: &QueuedUpload) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            status: item.status,
            size: item.size,
            retry_count: item.retry_count,
            url: item.media_url.clone(),
            error: item.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RejectedFile {
    pub name: String,
    pub reason: String,
}

/// What the CLI prints once the queue has settled or was interrupted.
#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub stats: QueueStats,
    pub interrupted: bool,
    /// Files never read because the run stopped early.
    pub not_loaded: usize,
    pub items: Vec<ItemSummary>,
    pub rejected: Vec<RejectedFile>,
}

impl UploadSummary {
    /// `retired` are uploaded items already taken out of the queue.
    pub fn new(
        snapshot: &QueueSnapshot,
        retired: Vec<ItemSummary>,
        rejected: &[(String, ValidationError)],
        not_loaded: usize,
        interrupted: bool,
    ) -> Self {
        let mut stats = snapshot.stats;
        stats.total += retired.len();
        stats.uploaded += retired.len();

        let mut items = retired;
        items.extend(snapshot.items.iter().map(|item| ItemSummary::from(item.as_ref())));

        Self {
            stats,
            interrupted,
            not_loaded,
            items,
            rejected: rejected
                .iter()
                .map(|(name, reason)| RejectedFile {
                    name: name.clone(),
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }

    /// Nothing failed, nothing was rejected and the run was not interrupted.
    pub fn is_success(&self) -> bool {
        !self.interrupted
            && self.not_loaded == 0
            && self.rejected.is_empty()
            && self.stats.failed == 0
    }
}
