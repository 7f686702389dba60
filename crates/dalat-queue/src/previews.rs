//! Bookkeeping of live preview handles per item.
//!
//! Previews are created on the blocking pool so large payloads never stall the
//! controller. Every request for an item gets a new generation; handles that come back
//! for an item that was removed, re-requested or torn down in the meantime are revoked
//! on the spot. Handles leave the ledger as they are revoked, so each one is revoked
//! exactly once.

use dalat_core::models::UploadFile;
use dalat_processing::PreviewStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::controller::Command;

/// Preview and thumbnail handles created for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PreviewHandles {
    pub preview: Option<String>,
    pub thumbnail: Option<String>,
}

impl PreviewHandles {
    fn to_vec(&self) -> Vec<String> {
        self.preview.iter().chain(&self.thumbnail).cloned().collect()
    }
}

#[derive(Default)]
struct Ledger {
    live: HashMap<Uuid, Vec<String>>,
    requested: HashMap<Uuid, u64>,
    next_generation: u64,
    closed: bool,
}

#[derive(Clone)]
pub(crate) struct PreviewLedger {
    store: Arc<dyn PreviewStore>,
    ledger: Arc<Mutex<Ledger>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PreviewLedger {
    pub fn new(store: Arc<dyn PreviewStore>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            store,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            commands,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn revoke_all(&self, handles: impl IntoIterator<Item = String>) {
        for handle in handles {
            self.store.revoke(&handle);
        }
    }

    /// Revoke the handles held for `id` and start creating new ones for `file`. The
    /// result arrives as [`Command::PreviewsReady`].
    pub fn request(&self, id: Uuid, file: UploadFile) {
        let (generation, previous) = {
            let mut ledger = self.lock();
            if ledger.closed {
                return;
            }
            ledger.next_generation += 1;
            let generation = ledger.next_generation;
            ledger.requested.insert(id, generation);
            (generation, ledger.live.remove(&id).unwrap_or_default())
        };
        self.revoke_all(previous);

        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let handles = this.create(id, &file);
            if this.register(id, generation, &handles) {
                let _ = this.commands.send(Command::PreviewsReady {
                    id,
                    generation,
                    handles,
                });
            }
        });
    }

    /// Preview failures are logged and leave the item without that handle.
    fn create(&self, id: Uuid, file: &UploadFile) -> PreviewHandles {
        let preview = self.store.create_preview(file).unwrap_or_else(|e| {
            tracing::warn!(item.id = %id, error = %e, "Failed to create preview");
            None
        });
        let thumbnail = self.store.create_thumbnail(file).unwrap_or_else(|e| {
            tracing::warn!(item.id = %id, error = %e, "Failed to create thumbnail");
            None
        });
        PreviewHandles { preview, thumbnail }
    }

    /// Record `handles` if `generation` is still the latest request for `id`,
    /// otherwise revoke them. Returns whether they were kept.
    fn register(&self, id: Uuid, generation: u64, handles: &PreviewHandles) -> bool {
        let kept = {
            let mut ledger = self.lock();
            let current = !ledger.closed && ledger.requested.get(&id) == Some(&generation);
            if current {
                ledger.live.entry(id).or_default().extend(handles.to_vec());
            }
            current
        };
        if !kept {
            tracing::debug!(item.id = %id, generation = generation, "Discarding outdated previews");
            self.revoke_all(handles.to_vec());
        }
        kept
    }

    pub fn is_current(&self, id: Uuid, generation: u64) -> bool {
        self.lock().requested.get(&id) == Some(&generation)
    }

    /// Revoke every handle held for `id` and drop any request still running for it.
    /// Calling again is a no-op.
    pub fn release(&self, id: Uuid) {
        let handles = {
            let mut ledger = self.lock();
            ledger.requested.remove(&id);
            ledger.live.remove(&id).unwrap_or_default()
        };
        self.revoke_all(handles);
    }

    /// Revoke everything and refuse further requests. Previews still being created
    /// are revoked as soon as they are done.
    pub fn release_all(&self) {
        let handles: Vec<String> = {
            let mut ledger = self.lock();
            ledger.closed = true;
            ledger.requested.clear();
            ledger.live.drain().flat_map(|(_, handles)| handles).collect()
        };
        if !handles.is_empty() {
            tracing::debug!(revoked = handles.len(), "Released all preview handles");
        }
        self.revoke_all(handles);
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.lock().live.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dalat_processing::ProcessingResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        next: AtomicUsize,
        revoked: Mutex<Vec<String>>,
    }

    impl CountingStore {
        fn revoked(&self) -> Vec<String> {
            self.revoked.lock().unwrap().clone()
        }
    }

    impl PreviewStore for CountingStore {
        fn create_preview(&self, _file: &UploadFile) -> ProcessingResult<Option<String>> {
            Ok(Some(format!("preview-{}", self.next.fetch_add(1, Ordering::SeqCst))))
        }

        fn create_thumbnail(&self, file: &UploadFile) -> ProcessingResult<Option<String>> {
            if file.is_video() {
                return Ok(None);
            }
            Ok(Some(format!("thumb-{}", self.next.fetch_add(1, Ordering::SeqCst))))
        }

        fn revoke(&self, handle: &str) {
            self.revoked.lock().unwrap().push(handle.to_string());
        }
    }

    fn image() -> UploadFile {
        UploadFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"jpeg"))
    }

    fn setup() -> (
        Arc<CountingStore>,
        PreviewLedger,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let store = Arc::new(CountingStore::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = PreviewLedger::new(store.clone(), tx);
        (store, ledger, rx)
    }

    async fn ready(rx: &mut mpsc::UnboundedReceiver<Command>) -> (Uuid, u64, PreviewHandles) {
        match rx.recv().await {
            Some(Command::PreviewsReady {
                id,
                generation,
                handles,
            }) => (id, generation, handles),
            _ => panic!("expected previews"),
        }
    }

    #[tokio::test]
    async fn test_release_revokes_once() {
        let (store, ledger, mut rx) = setup();
        let id = Uuid::new_v4();

        ledger.request(id, image());
        let (ready_id, generation, handles) = ready(&mut rx).await;
        assert_eq!(ready_id, id);
        assert!(ledger.is_current(id, generation));
        assert!(handles.preview.is_some() && handles.thumbnail.is_some());

        ledger.release(id);
        ledger.release(id);
        ledger.release_all();

        assert_eq!(store.revoked(), vec!["preview-0".to_string(), "thumb-1".to_string()]);
        assert_eq!(ledger.live_count(), 0);
    }

    #[tokio::test]
    async fn test_new_request_revokes_previous_handles() {
        let (store, ledger, mut rx) = setup();
        let id = Uuid::new_v4();

        ledger.request(id, image());
        let (_, first, _) = ready(&mut rx).await;

        let video = UploadFile::new("a.mp4", "video/mp4", Bytes::from_static(b"mp4"));
        ledger.request(id, video);
        assert_eq!(store.revoked().len(), 2);
        assert!(!ledger.is_current(id, first));

        let (_, second, handles) = ready(&mut rx).await;
        assert!(ledger.is_current(id, second));
        assert_eq!(handles.preview.as_deref(), Some("preview-2"));
        assert!(handles.thumbnail.is_none());
        assert_eq!(ledger.live_count(), 1);
    }

    #[test]
    fn test_outdated_handles_are_revoked_on_arrival() {
        let (store, ledger, _rx) = setup();
        let id = Uuid::new_v4();
        let handles = PreviewHandles {
            preview: Some("late".to_string()),
            thumbnail: None,
        };

        // nothing was requested for this item
        assert!(!ledger.register(id, 1, &handles));
        assert_eq!(store.revoked(), vec!["late".to_string()]);
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn test_closed_ledger_rejects_everything() {
        let (store, ledger, _rx) = setup();
        ledger.release_all();

        ledger.request(Uuid::new_v4(), image());
        assert!(!ledger.register(Uuid::new_v4(), 0, &PreviewHandles::default()));
        assert_eq!(store.next.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_release_all() {
        let (store, ledger, mut rx) = setup();
        ledger.request(Uuid::new_v4(), image());
        ledger.request(Uuid::new_v4(), image());
        ready(&mut rx).await;
        ready(&mut rx).await;

        ledger.release_all();
        ledger.release_all();

        assert_eq!(store.revoked().len(), 4);
    }
}
