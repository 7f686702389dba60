use async_trait::async_trait;
use bytes::Bytes;
use dalat_storage::{
    Storage, StorageBackend, StorageError, StorageResult, StoredObject, UploadOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(u32),
    Always,
}

/// In-memory storage driven by a script.
///
/// Files are told apart by payload (see `fixtures`). A gated storage holds every
/// upload until `release` hands out permits, which makes concurrency observable.
#[derive(Default)]
pub struct FakeStorage {
    gate: Option<Semaphore>,
    failures: Mutex<HashMap<Bytes, Failure>>,
    permanent: Mutex<Vec<Bytes>>,
    attempts: Mutex<HashMap<Bytes, u32>>,
    uploaded: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    /// Fail the first `times` uploads of the file named `name` with a transient error.
    pub fn fail_times(self, name: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(Bytes::from(name.to_string()), Failure::Times(times));
        self
    }

    pub fn fail_always(self, name: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(Bytes::from(name.to_string()), Failure::Always);
        self
    }

    /// Reject every upload of `name` with a non-transient error.
    pub fn reject(self, name: &str) -> Self {
        self.permanent
            .lock()
            .unwrap()
            .push(Bytes::from(name.to_string()));
        self
    }

    /// Let `n` held uploads through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(name.as_bytes())
            .copied()
            .unwrap_or(0)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, data: &Bytes) -> Option<StorageError> {
        if self.permanent.lock().unwrap().contains(data) {
            return Some(StorageError::InvalidKey("rejected by test".to_string()));
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(data) {
            Some(Failure::Always) => Some(StorageError::UploadFailed("network down".to_string())),
            Some(Failure::Times(n)) if *n > 0 => {
                *n -= 1;
                Some(StorageError::UploadFailed("network down".to_string()))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        data: Bytes,
        _options: &UploadOptions,
    ) -> StorageResult<StoredObject> {
        *self.attempts.lock().unwrap().entry(data.clone()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?
                .forget();
        }

        if let Some(error) = self.scripted_failure(&data) {
            return Err(error);
        }

        let name = String::from_utf8_lossy(&data).to_string();
        self.uploaded.lock().unwrap().push(name);
        Ok(StoredObject::new(
            key,
            format!("https://cdn.test/{}/{}", bucket, key),
        ))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
