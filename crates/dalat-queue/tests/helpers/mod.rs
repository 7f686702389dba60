//! Test helpers: scripted collaborators and a queue wired to them.
//!
//! Run from the workspace root: `cargo test -p dalat-queue`.

#![allow(dead_code)]

pub mod fixtures;
pub mod previews;
pub mod processing;
pub mod storage;

use dalat_core::config::{QueueConfig, ValidationConfig};
use dalat_processing::UploadValidator;
use dalat_queue::{Collaborators, QueueSnapshot, UploadQueue, UploadTarget};
use std::sync::Arc;
use std::time::Duration;

use previews::RecordingPreviews;
use storage::FakeStorage;

/// Retry schedule short enough for tests.
pub fn fast_config() -> QueueConfig {
    QueueConfig {
        retry_delays: vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
        ],
        ..Default::default()
    }
}

pub struct TestQueue {
    pub queue: UploadQueue,
    pub storage: Arc<FakeStorage>,
    pub previews: Arc<RecordingPreviews>,
}

pub fn setup_queue(config: QueueConfig, storage: FakeStorage) -> TestQueue {
    setup_queue_with(config, storage, |collaborators| collaborators)
}

/// Like `setup_queue`, with a chance to swap in processing fakes.
pub fn setup_queue_with(
    config: QueueConfig,
    storage: FakeStorage,
    customize: impl FnOnce(Collaborators) -> Collaborators,
) -> TestQueue {
    let storage = Arc::new(storage);
    let previews = Arc::new(RecordingPreviews::default());
    let collaborators = customize(
        Collaborators::new(
            storage.clone(),
            Arc::new(UploadValidator::from_config(&ValidationConfig::default())),
        )
        .with_previews(previews.clone()),
    );

    let queue = UploadQueue::new(config, UploadTarget::new("moments"), collaborators);
    TestQueue {
        queue,
        storage,
        previews,
    }
}

/// Wait for the first snapshot matching `predicate`, failing the test after 5 seconds.
pub async fn wait_for(
    queue: &UploadQueue,
    predicate: impl FnMut(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    let mut snapshots = queue.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for queue state")
        .expect("queue closed")
        .clone();
    snapshot
}

/// Wait until every item shows its preview. Previews are created off the controller
/// and may land after the queue settles.
pub async fn previews_shown(queue: &UploadQueue) -> QueueSnapshot {
    wait_for(queue, |s| s.items.iter().all(|i| i.preview_url.is_some())).await
}

pub async fn settle(queue: &UploadQueue) -> QueueSnapshot {
    tokio::time::timeout(Duration::from_secs(5), queue.wait_until_settled())
        .await
        .expect("timed out waiting for queue to settle")
        .expect("queue closed")
}

/// Poll `condition` until it holds, failing the test after 5 seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5 seconds"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
