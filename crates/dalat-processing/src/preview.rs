//! Local preview handles for queued files.
//!
//! A handle is an opaque string (a `file://` URL for `TempDirPreviews`). Whoever
//! creates a handle owns it and must revoke it once.

use crate::error::{ProcessingError, ProcessingResult};
use dalat_core::models::UploadFile;
use image::ImageFormat;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use uuid::Uuid;

const THUMBNAIL_SIZE: u32 = 320;
/// Files above this size get no full-size preview.
pub const DEFAULT_MAX_PREVIEW_BYTES: usize = 32 * 1024 * 1024;

pub trait PreviewStore: Send + Sync {
    /// Full-size preview of the file, `None` when the store does not preview this kind.
    fn create_preview(&self, file: &UploadFile) -> ProcessingResult<Option<String>>;

    /// Small still for list views.
    fn create_thumbnail(&self, file: &UploadFile) -> ProcessingResult<Option<String>>;

    fn revoke(&self, handle: &str);
}

/// Previews disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreviews;

impl PreviewStore for NoPreviews {
    fn create_preview(&self, _file: &UploadFile) -> ProcessingResult<Option<String>> {
        Ok(None)
    }

    fn create_thumbnail(&self, _file: &UploadFile) -> ProcessingResult<Option<String>> {
        Ok(None)
    }

    fn revoke(&self, _handle: &str) {}
}

/// Writes previews into a private temp directory removed on drop.
#[derive(Debug)]
pub struct TempDirPreviews {
    dir: TempDir,
    max_preview_bytes: usize,
    live: Mutex<HashSet<String>>,
}

impl TempDirPreviews {
    pub fn new() -> ProcessingResult<Self> {
        let dir = tempfile::Builder::new().prefix("dalat-previews-").tempdir()?;
        Ok(Self {
            dir,
            max_preview_bytes: DEFAULT_MAX_PREVIEW_BYTES,
            live: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_max_preview_bytes(mut self, max_preview_bytes: usize) -> Self {
        self.max_preview_bytes = max_preview_bytes;
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Handles created and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    fn write(&self, extension: &str, data: &[u8]) -> ProcessingResult<String> {
        let path = self.dir.path().join(format!("{}.{}", Uuid::new_v4(), extension));
        std::fs::write(&path, data)?;

        let handle = format!("file://{}", path.display());
        self.live
            .lock()
            .map_err(|_| ProcessingError::Preview("preview registry poisoned".to_string()))?
            .insert(handle.clone());
        Ok(handle)
    }

    fn path_for(&self, handle: &str) -> Option<PathBuf> {
        let path = PathBuf::from(handle.strip_prefix("file://")?);
        if path.parent() != Some(self.dir.path()) {
            return None;
        }
        Some(path)
    }
}

impl PreviewStore for TempDirPreviews {
    fn create_preview(&self, file: &UploadFile) -> ProcessingResult<Option<String>> {
        if file.size() > self.max_preview_bytes {
            tracing::debug!(
                file.name = %file.name,
                file.size = file.size(),
                "File too large for a preview copy"
            );
            return Ok(None);
        }

        let extension = match file.extension() {
            ext if ext.is_empty() => "bin".to_string(),
            ext => ext,
        };
        self.write(&extension, &file.data).map(Some)
    }

    fn create_thumbnail(&self, file: &UploadFile) -> ProcessingResult<Option<String>> {
        if !file.is_image() {
            return Ok(None);
        }

        // formats the image crate cannot decode (HEIC) simply get no thumbnail
        let img = match image::load_from_memory(&file.data) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(file.name = %file.name, error = %e, "No thumbnail for undecodable image");
                return Ok(None);
            }
        };

        let thumbnail = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE).to_rgb8();
        let mut buffer = Vec::new();
        thumbnail
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .map_err(|e| ProcessingError::Encode(e.to_string()))?;

        self.write("jpg", &buffer).map(Some)
    }

    fn revoke(&self, handle: &str) {
        let was_live = match self.live.lock() {
            Ok(mut live) => live.remove(handle),
            Err(_) => false,
        };
        if !was_live {
            tracing::warn!(handle = %handle, "Revoke of unknown preview handle");
            return;
        }

        if let Some(path) = self.path_for(handle) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove preview file");
            }
        }
    }
}
