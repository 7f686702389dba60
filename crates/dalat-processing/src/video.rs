//! Video re-encoding for large clips.

use crate::error::{ProcessingError, ProcessingResult};
use crate::ffmpeg::Ffmpeg;
use async_trait::async_trait;
use bytes::Bytes;
use dalat_core::models::UploadFile;
use tokio::sync::mpsc;

#[async_trait]
pub trait VideoCompression: Send + Sync {
    fn should_compress(&self, file: &UploadFile) -> bool;

    /// Compress `file`, sending 0-100 progress updates on `progress` as work advances.
    async fn compress(
        &self,
        file: &UploadFile,
        progress: mpsc::Sender<u8>,
    ) -> ProcessingResult<UploadFile>;
}

/// Re-encodes to H.264/AAC MP4 capped at a target height.
#[derive(Debug, Clone)]
pub struct FfmpegVideoCompressor {
    ffmpeg: Ffmpeg,
    threshold_bytes: usize,
    target_height: u32,
    crf: u8,
}

impl FfmpegVideoCompressor {
    pub fn new(ffmpeg: Ffmpeg, threshold_bytes: usize, target_height: u32, crf: u8) -> Self {
        Self {
            ffmpeg,
            threshold_bytes,
            target_height,
            crf: crf.min(51),
        }
    }

    fn ffmpeg_args(&self, input: &str, output: &str) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string(),
            "-vf".to_string(),
            // never upscale; -2 keeps the width even for libx264
            format!("scale=-2:'min({},ih)'", self.target_height),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string(),
        ]
    }
}

#[async_trait]
impl VideoCompression for FfmpegVideoCompressor {
    fn should_compress(&self, file: &UploadFile) -> bool {
        file.is_video() && file.size() > self.threshold_bytes
    }

    #[tracing::instrument(skip(self, file, progress), fields(file.name = %file.name, file.size = file.size()))]
    async fn compress(
        &self,
        file: &UploadFile,
        progress: mpsc::Sender<u8>,
    ) -> ProcessingResult<UploadFile> {
        let start = std::time::Instant::now();

        let extension = match file.extension() {
            ext if ext.is_empty() => "mp4".to_string(),
            ext => ext,
        };
        let input = tempfile::Builder::new()
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        tokio::fs::write(input.path(), &file.data).await?;
        let output = tempfile::Builder::new().suffix(".mp4").tempfile()?;

        let duration = self.ffmpeg.probe_duration(input.path()).await?;
        let args = self.ffmpeg_args(
            &input.path().to_string_lossy(),
            &output.path().to_string_lossy(),
        );
        self.ffmpeg
            .run_with_progress(&args, duration, &progress)
            .await?;

        let data = tokio::fs::read(output.path()).await?;
        if data.is_empty() {
            return Err(ProcessingError::Ffmpeg(format!(
                "compression of {} produced no output",
                file.name
            )));
        }

        if data.len() >= file.size() {
            tracing::debug!(
                input_bytes = file.size(),
                output_bytes = data.len(),
                "Re-encoded video is not smaller, keeping original"
            );
            return Ok(file.clone());
        }

        let compressed = UploadFile::new(file.with_extension("mp4"), "video/mp4", Bytes::from(data));

        tracing::info!(
            input_bytes = file.size(),
            output_bytes = compressed.size(),
            video_duration = duration.unwrap_or_default(),
            duration_ms = start.elapsed().as_millis(),
            "Compressed video"
        );

        Ok(compressed)
    }
}
