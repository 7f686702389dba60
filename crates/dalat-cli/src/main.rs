//! dalat-upload: bulk upload photos and videos into a moments bucket.
//!
//! Configuration comes from the environment (see `dalat_core::config`); flags override
//! the most common settings. Ctrl-C pauses the queue, a second Ctrl-C stops it.

use anyhow::Context;
use clap::Parser;
use dalat_cli::{
    backlog_below, collect_files, init_tracing, retire_uploaded, short_name, PendingFiles,
    UploadSummary, MIN_LOAD_BATCH,
};
use dalat_core::Config;
use dalat_queue::{Collaborators, UploadQueue, UploadTarget};
use dalat_storage::create_storage;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dalat-upload", about = "Upload photos and videos to dalat.app moments")]
struct Cli {
    /// Files or directories to upload
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<PathBuf>,

    /// Maximum number of files processed at once
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Target bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Key prefix inside the bucket, e.g. an event slug
    #[arg(long)]
    prefix: Option<String>,

    /// Walk directories
    #[arg(long, short = 'r')]
    recursive: bool,

    /// Upload HEIC and QuickTime files as they are
    #[arg(long)]
    no_convert: bool,

    /// Skip image and video compression
    #[arg(long)]
    no_compress: bool,
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(concurrency) = cli.concurrency {
        config.queue.max_concurrent = concurrency;
    }
    if let Some(bucket) = &cli.bucket {
        config.storage.bucket = bucket.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.storage.key_prefix = Some(prefix.clone());
    }
    if cli.no_convert {
        config.processing.conversion_enabled = false;
    }
    if cli.no_compress {
        config.processing.compression_enabled = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    let paths = collect_files(&cli.paths, cli.recursive).await?;
    if paths.is_empty() {
        anyhow::bail!("No files to upload");
    }
    let total_files = paths.len();

    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize storage")?;
    let collaborators = Collaborators::from_config(&config, storage)
        .context("Failed to initialize media processing")?;
    let queue = UploadQueue::new(
        config.queue.clone(),
        UploadTarget::from_config(&config.storage),
        collaborators,
    );

    // keep about two batches of payloads in memory: one running, one waiting
    let batch_size = (config.queue.max_concurrent * 2).max(MIN_LOAD_BATCH);
    let mut pending = PendingFiles::new(paths, batch_size);
    let mut rejected = Vec::new();
    let mut retired = Vec::new();

    tracing::info!(
        files = total_files,
        bucket = %config.storage.bucket,
        "Upload started"
    );

    let mut updates = queue.subscribe();
    let progress = tokio::spawn(async move {
        let mut last = None;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if last == Some(snapshot.stats) {
                continue;
            }
            last = Some(snapshot.stats);

            let active: Vec<String> = snapshot
                .items
                .iter()
                .filter(|item| item.status.is_active())
                .map(|item| format!("{} ({})", short_name(&item.name, 32), item.status))
                .collect();
            tracing::info!(
                uploaded = snapshot.stats.uploaded,
                failed = snapshot.stats.failed,
                retrying = snapshot.stats.retrying,
                queued = snapshot.stats.queued,
                total = snapshot.stats.total,
                active = ?active,
                "Progress"
            );
        }
    });

    let mut interrupted = false;
    let mut not_loaded = 0;
    loop {
        tokio::select! {
            backlog = backlog_below(&queue, batch_size), if !pending.is_empty() => {
                backlog?;
                retire_uploaded(&queue, &mut retired).await?;
                let files = pending.next_batch().await?;
                let enqueued = queue.add_files(files).await?;
                for (name, reason) in &enqueued.rejected {
                    tracing::warn!(file.name = %name, reason = %reason, "Skipping file");
                }
                tracing::debug!(
                    accepted = enqueued.ids.len(),
                    remaining = pending.len(),
                    "Loaded batch"
                );
                rejected.extend(enqueued.rejected);
            }
            settled = queue.wait_until_settled(), if pending.is_empty() => {
                settled?;
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                if queue.is_paused() {
                    interrupted = true;
                    break;
                }
                queue.pause().await?;
                not_loaded = pending.abandon();
                tracing::warn!(
                    not_loaded = not_loaded,
                    "Paused, running uploads will finish. Press Ctrl-C again to stop"
                );
            }
        }
    }

    let snapshot = queue.snapshot();
    queue.shutdown().await;
    progress.abort();

    let summary = UploadSummary::new(&snapshot, retired, &rejected, not_loaded, interrupted);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Serialize summary")?
    );

    if !summary.is_success() {
        anyhow::bail!(
            "Upload incomplete: {} uploaded, {} failed, {} rejected, {} not started",
            summary.stats.uploaded,
            summary.stats.failed,
            summary.rejected.len(),
            summary.stats.queued + summary.not_loaded
        );
    }
    Ok(())
}
