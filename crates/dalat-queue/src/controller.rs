//! The controller task: sole owner of the queue state.
//!
//! Consumer operations, pipeline events and retry timers all arrive as [`Command`]s on
//! one channel and are applied one at a time. Each command is reduced into the state,
//! followed by a scheduling pass where a slot may have opened, and the result is
//! published on a watch channel before the caller is acknowledged.
//!
//! `running` holds exactly the items in an active status, so
//! `state.active_count == running.len()` after every command.

use dalat_core::config::QueueConfig;
use dalat_core::models::{ItemPatch, QueuedUpload, UploadStatus};
use dalat_core::{ErrorMetadata, UploadError};
use dalat_processing::PreviewStore;
use dalat_storage::StoredObject;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::{Pipeline, WorkerEvent};
use crate::previews::{PreviewHandles, PreviewLedger};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{reduce, QueueAction, QueueSnapshot, QueueState};

pub(crate) type Ack = oneshot::Sender<()>;

pub(crate) enum Command {
    Add {
        items: Vec<QueuedUpload>,
        ack: Ack,
    },
    Remove {
        id: Uuid,
        ack: Ack,
    },
    Retry {
        id: Uuid,
        ack: Ack,
    },
    RetryAllFailed {
        ack: Ack,
    },
    Pause {
        ack: Ack,
    },
    Resume {
        ack: Ack,
    },
    ClearCompleted {
        ack: Ack,
    },
    Shutdown {
        ack: Option<Ack>,
    },
    Worker(WorkerEvent),
    /// A retry delay elapsed for the failure that left the item at `retry_count`.
    RetryDue {
        id: Uuid,
        retry_count: u32,
    },
    /// Previews finished for the preview request numbered `generation`.
    PreviewsReady {
        id: Uuid,
        generation: u64,
        handles: PreviewHandles,
    },
}

struct Running {
    token: CancellationToken,
    attempt: u64,
}

pub(crate) struct Controller {
    state: QueueState,
    max_concurrent: usize,
    policy: RetryPolicy,
    cancel_in_flight_on_shutdown: bool,
    pipeline: Arc<Pipeline>,
    previews: PreviewLedger,
    running: HashMap<Uuid, Running>,
    next_attempt: u64,
    in_flight: CancellationToken,
    timers: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Sender<QueueSnapshot>,
}

impl Controller {
    pub fn new(
        config: &QueueConfig,
        pipeline: Arc<Pipeline>,
        previews: Arc<dyn PreviewStore>,
        commands: mpsc::UnboundedSender<Command>,
        snapshots: watch::Sender<QueueSnapshot>,
    ) -> Self {
        if config.max_concurrent == 0 {
            tracing::warn!("max_concurrent of 0 would never start an upload, using 1");
        }

        Self {
            state: QueueState::default(),
            max_concurrent: config.max_concurrent.max(1),
            policy: RetryPolicy::from_config(config),
            cancel_in_flight_on_shutdown: config.cancel_in_flight_on_shutdown,
            pipeline,
            previews: PreviewLedger::new(previews, commands.clone()),
            running: HashMap::new(),
            next_attempt: 0,
            in_flight: CancellationToken::new(),
            timers: CancellationToken::new(),
            commands,
            snapshots,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(
            max_concurrent = self.max_concurrent,
            max_retries = self.policy.max_retries,
            "Upload queue started"
        );

        while let Some(command) = commands.recv().await {
            if let Command::Shutdown { ack } = command {
                self.shutdown();
                self.publish();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return;
            }

            let ack = self.handle(command);
            self.publish();
            if let Some(ack) = ack {
                // the caller may have stopped waiting
                let _ = ack.send(());
            }
        }
    }

    fn handle(&mut self, command: Command) -> Option<Ack> {
        match command {
            Command::Add { items, ack } => {
                self.add(items);
                Some(ack)
            }
            Command::Remove { id, ack } => {
                self.remove(id);
                Some(ack)
            }
            Command::Retry { id, ack } => {
                self.apply(QueueAction::RetryItem {
                    id,
                    reset_retry_count: self.policy.resets_on_manual_retry(),
                });
                self.schedule();
                Some(ack)
            }
            Command::RetryAllFailed { ack } => {
                let failed = self.state.stats().failed;
                self.apply(QueueAction::RetryAllFailed {
                    reset_retry_count: self.policy.resets_on_manual_retry(),
                });
                tracing::info!(count = failed, "Retrying all failed uploads");
                self.schedule();
                Some(ack)
            }
            Command::Pause { ack } => {
                self.apply(QueueAction::SetPaused(true));
                tracing::info!(active = self.state.active_count, "Upload queue paused");
                Some(ack)
            }
            Command::Resume { ack } => {
                self.apply(QueueAction::SetPaused(false));
                tracing::info!("Upload queue resumed");
                self.schedule();
                Some(ack)
            }
            Command::ClearCompleted { ack } => {
                self.clear_completed();
                Some(ack)
            }
            Command::Worker(event) => {
                self.on_worker_event(event);
                None
            }
            Command::RetryDue { id, retry_count } => {
                self.on_retry_due(id, retry_count);
                None
            }
            Command::PreviewsReady {
                id,
                generation,
                handles,
            } => {
                self.on_previews_ready(id, generation, handles);
                None
            }
            Command::Shutdown { ack } => ack,
        }
    }

    fn apply(&mut self, action: QueueAction) {
        self.state = reduce(&self.state, action);
    }

    fn update(&mut self, id: Uuid, patch: ItemPatch) {
        self.apply(QueueAction::UpdateItem { id, patch });
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.state.snapshot());
    }

    fn add(&mut self, items: Vec<QueuedUpload>) {
        let count = items.len();
        for item in &items {
            self.previews.request(item.id, item.file.clone());
        }

        self.apply(QueueAction::AddFiles(items));
        tracing::info!(count = count, total = self.state.items.len(), "Files enqueued");
        self.schedule();
    }

    fn remove(&mut self, id: Uuid) {
        if !self.state.contains(id) {
            tracing::debug!(item.id = %id, "Remove of unknown item ignored");
            return;
        }

        if let Some(running) = self.running.remove(&id) {
            running.token.cancel();
            self.apply(QueueAction::DecrementActive);
            tracing::info!(item.id = %id, "Cancelled in-flight upload");
        }

        self.apply(QueueAction::RemoveItem(id));
        self.previews.release(id);
        tracing::debug!(item.id = %id, "Item removed");
        self.schedule();
    }

    fn clear_completed(&mut self) {
        let uploaded: Vec<Uuid> = self
            .state
            .items
            .iter()
            .filter(|item| item.status == UploadStatus::Uploaded)
            .map(|item| item.id)
            .collect();

        for id in &uploaded {
            self.previews.release(*id);
        }
        self.apply(QueueAction::ClearCompleted);
        tracing::debug!(count = uploaded.len(), "Cleared uploaded items");
    }

    /// Start queued items while slots are free and the queue is not paused.
    fn schedule(&mut self) {
        if self.state.is_paused {
            return;
        }
        let available = self.max_concurrent.saturating_sub(self.state.active_count);
        if available == 0 {
            return;
        }

        for id in self.state.next_queued(available) {
            self.dispatch(id);
        }
    }

    fn dispatch(&mut self, id: Uuid) {
        let Some(item) = self.state.item(id) else {
            return;
        };
        let file = item.file.clone();
        let done = item.processed;
        let retry_count = item.retry_count;
        let status = self.pipeline.first_phase(&file, done);

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let token = self.in_flight.child_token();

        self.apply(QueueAction::IncrementActive);
        self.update(id, ItemPatch::new().status(status).progress(0));
        self.running.insert(
            id,
            Running {
                token: token.clone(),
                attempt,
            },
        );

        tracing::debug!(
            item.id = %id,
            attempt = attempt,
            status = %status,
            retry_count = retry_count,
            active = self.state.active_count,
            "Dispatching upload"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let events = self.commands.clone();
        tokio::spawn(async move {
            pipeline.run(id, attempt, file, done, events, token).await;
        });
    }

    fn on_worker_event(&mut self, event: WorkerEvent) {
        let id = event.id();
        let current = self
            .running
            .get(&id)
            .is_some_and(|running| running.attempt == event.attempt());
        let active = self
            .state
            .item(id)
            .is_some_and(|item| item.status.is_active());
        if !current || !active {
            tracing::debug!(item.id = %id, attempt = event.attempt(), "Ignoring stale worker event");
            return;
        }

        match event {
            WorkerEvent::Phase { status, .. } => {
                self.update(id, ItemPatch::new().status(status).progress(0));
            }
            WorkerEvent::Progress { progress, .. } => {
                self.update(id, ItemPatch::new().progress(progress));
            }
            WorkerEvent::FileReplaced { file, step, .. } => {
                self.previews.request(id, file.clone());
                self.update(
                    id,
                    ItemPatch::new()
                        .processed(file, step)
                        .preview_url(None)
                        .thumbnail_url(None),
                );
            }
            WorkerEvent::Uploaded { stored, .. } => self.on_uploaded(id, stored),
            WorkerEvent::Failed { error, .. } => self.on_failed(id, error),
        }
    }

    fn on_previews_ready(&mut self, id: Uuid, generation: u64, handles: PreviewHandles) {
        // a newer request or a removal has already revoked these handles
        if !self.previews.is_current(id, generation) || !self.state.contains(id) {
            return;
        }
        self.update(
            id,
            ItemPatch::new()
                .preview_url(handles.preview)
                .thumbnail_url(handles.thumbnail),
        );
    }

    fn release_slot(&mut self, id: Uuid) {
        self.running.remove(&id);
        self.apply(QueueAction::DecrementActive);
    }

    fn on_uploaded(&mut self, id: Uuid, stored: StoredObject) {
        self.release_slot(id);
        self.update(
            id,
            ItemPatch::new()
                .status(UploadStatus::Uploaded)
                .progress(100)
                .media_url(stored.public_url.clone())
                .video_uid(stored.video_uid)
                .playback_url(stored.playback_url),
        );
        tracing::info!(item.id = %id, url = %stored.public_url, "Item uploaded");
        self.schedule();
    }

    fn on_failed(&mut self, id: Uuid, error: UploadError) {
        self.release_slot(id);

        let retry_count = self.state.item(id).map_or(0, |item| item.retry_count);
        let message = error.to_string();

        match self.policy.decide(retry_count, error.is_recoverable()) {
            RetryDecision::RetryAfter(delay) => {
                let next_count = retry_count + 1;
                self.update(
                    id,
                    ItemPatch::new()
                        .status(UploadStatus::Error)
                        .error(message)
                        .retry_count(next_count)
                        .retry_pending(true),
                );
                tracing::info!(
                    item.id = %id,
                    retry_count = next_count,
                    delay_ms = delay.as_millis(),
                    "Scheduling automatic retry"
                );
                self.start_retry_timer(id, next_count, delay);
            }
            RetryDecision::GiveUp => {
                self.update(
                    id,
                    ItemPatch::new()
                        .status(UploadStatus::Error)
                        .error(message)
                        .retry_pending(false),
                );
                tracing::warn!(
                    item.id = %id,
                    retry_count = retry_count,
                    error_code = error.error_code(),
                    "Upload failed permanently"
                );
            }
        }

        self.schedule();
    }

    fn start_retry_timer(&self, id: Uuid, retry_count: u32, delay: Duration) {
        let commands = self.commands.clone();
        let cancel = self.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = commands.send(Command::RetryDue { id, retry_count });
                }
            }
        });
    }

    fn on_retry_due(&mut self, id: Uuid, retry_count: u32) {
        let still_pending = self.state.item(id).is_some_and(|item| {
            item.status == UploadStatus::Error
                && item.retry_pending
                && item.retry_count == retry_count
        });
        if !still_pending {
            tracing::debug!(item.id = %id, "Retry timer no longer applies");
            return;
        }

        self.update(id, ItemPatch::new().status(UploadStatus::Queued).progress(0));
        tracing::debug!(item.id = %id, retry_count = retry_count, "Item re-queued for retry");
        self.schedule();
    }

    fn shutdown(&mut self) {
        self.previews.release_all();
        self.timers.cancel();

        let in_flight = self.running.len();
        if self.cancel_in_flight_on_shutdown {
            self.in_flight.cancel();
        }

        tracing::info!(
            in_flight = in_flight,
            cancelled = self.cancel_in_flight_on_shutdown,
            "Upload queue shut down"
        );
    }
}
