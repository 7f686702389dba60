use async_trait::async_trait;
use bytes::Bytes;
use dalat_core::models::UploadFile;
use dalat_processing::{MediaConverter, ProcessingError, ProcessingResult, VideoCompression};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Turns HEIC stills into "JPEGs" without touching a decoder.
pub struct FakeHeicConverter;

#[async_trait]
impl MediaConverter for FakeHeicConverter {
    fn needs_conversion(&self, file: &UploadFile) -> bool {
        file.content_type == "image/heic"
    }

    async fn convert(&self, file: &UploadFile) -> ProcessingResult<UploadFile> {
        if file.data.as_ref() == b"corrupt" {
            return Err(ProcessingError::Decode("not a heic file".to_string()));
        }
        Ok(UploadFile::new(
            file.with_extension("jpg"),
            "image/jpeg",
            Bytes::from(format!("converted:{}", file.name)),
        ))
    }
}

/// Halves every video, reporting progress in quarters.
pub struct FakeVideoCompressor;

#[async_trait]
impl VideoCompression for FakeVideoCompressor {
    fn should_compress(&self, _file: &UploadFile) -> bool {
        true
    }

    async fn compress(
        &self,
        file: &UploadFile,
        progress: mpsc::Sender<u8>,
    ) -> ProcessingResult<UploadFile> {
        for pct in [25, 50, 75, 100] {
            let _ = progress.send(pct).await;
        }
        let half = file.data.slice(..file.data.len() / 2);
        Ok(UploadFile::new(file.name.clone(), file.content_type.clone(), half))
    }
}

/// Keeps three quarters of a video and would happily shrink it again.
#[derive(Default)]
pub struct ShrinkingVideoCompressor {
    calls: AtomicUsize,
}

impl ShrinkingVideoCompressor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoCompression for ShrinkingVideoCompressor {
    fn should_compress(&self, file: &UploadFile) -> bool {
        file.size() > 4
    }

    async fn compress(
        &self,
        file: &UploadFile,
        _progress: mpsc::Sender<u8>,
    ) -> ProcessingResult<UploadFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let kept = file.data.slice(..file.data.len() * 3 / 4);
        Ok(UploadFile::new(file.name.clone(), file.content_type.clone(), kept))
    }
}
