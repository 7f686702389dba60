use dalat_core::models::UploadFile;
use dalat_processing::{PreviewStore, ProcessingResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Hands out `preview-N`/`thumb-N` handles and counts how often each is revoked.
#[derive(Default)]
pub struct RecordingPreviews {
    next: AtomicUsize,
    created: Mutex<Vec<String>>,
    revoked: Mutex<HashMap<String, usize>>,
}

impl RecordingPreviews {
    fn issue(&self, kind: &str) -> String {
        let handle = format!("{}-{}", kind, self.next.fetch_add(1, Ordering::SeqCst));
        self.created.lock().unwrap().push(handle.clone());
        handle
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn revoke_count(&self, handle: &str) -> usize {
        self.revoked.lock().unwrap().get(handle).copied().unwrap_or(0)
    }

    /// Handles created and not revoked.
    pub fn live(&self) -> Vec<String> {
        let revoked = self.revoked.lock().unwrap();
        self.created()
            .into_iter()
            .filter(|h| !revoked.contains_key(h))
            .collect()
    }

    /// No handle was revoked more than once.
    pub fn no_double_revoke(&self) -> bool {
        self.revoked.lock().unwrap().values().all(|&n| n == 1)
    }
}

impl PreviewStore for RecordingPreviews {
    fn create_preview(&self, _file: &UploadFile) -> ProcessingResult<Option<String>> {
        Ok(Some(self.issue("preview")))
    }

    fn create_thumbnail(&self, file: &UploadFile) -> ProcessingResult<Option<String>> {
        if file.is_video() {
            return Ok(None);
        }
        Ok(Some(self.issue("thumb")))
    }

    fn revoke(&self, handle: &str) {
        *self
            .revoked
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default() += 1;
    }
}
