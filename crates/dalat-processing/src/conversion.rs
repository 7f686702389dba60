//! Format conversion ahead of compression: formats browsers cannot display are turned
//! into ones they can (HEIC/HEIF stills into JPEG, QuickTime into MP4).

use crate::error::{ProcessingError, ProcessingResult};
use crate::ffmpeg::Ffmpeg;
use async_trait::async_trait;
use bytes::Bytes;
use dalat_core::models::UploadFile;

#[async_trait]
pub trait MediaConverter: Send + Sync {
    fn needs_conversion(&self, file: &UploadFile) -> bool;

    async fn convert(&self, file: &UploadFile) -> ProcessingResult<UploadFile>;
}

/// Leaves every file as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConversion;

#[async_trait]
impl MediaConverter for NoConversion {
    fn needs_conversion(&self, _file: &UploadFile) -> bool {
        false
    }

    async fn convert(&self, file: &UploadFile) -> ProcessingResult<UploadFile> {
        Ok(file.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Jpeg,
    Mp4,
}

impl Target {
    fn extension(self) -> &'static str {
        match self {
            Target::Jpeg => "jpg",
            Target::Mp4 => "mp4",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Target::Jpeg => "image/jpeg",
            Target::Mp4 => "video/mp4",
        }
    }
}

fn conversion_target(file: &UploadFile) -> Option<Target> {
    let extension = file.extension();
    match file.content_type.as_str() {
        "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence" => {
            Some(Target::Jpeg)
        }
        "video/quicktime" => Some(Target::Mp4),
        "" | "application/octet-stream" => match extension.as_str() {
            "heic" | "heif" => Some(Target::Jpeg),
            "mov" => Some(Target::Mp4),
            _ => None,
        },
        _ => None,
    }
}

/// Converts through ffmpeg using temp files.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    ffmpeg: Ffmpeg,
}

impl FfmpegConverter {
    pub fn new(ffmpeg: Ffmpeg) -> Self {
        Self { ffmpeg }
    }

    fn ffmpeg_args(target: Target, input: &str, output: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-i".into(), input.into()];
        match target {
            Target::Jpeg => {
                args.extend(["-frames:v", "1", "-q:v", "2"].map(String::from));
            }
            Target::Mp4 => {
                // QuickTime from phones is H.264/HEVC + AAC, both valid in MP4
                args.extend(["-c", "copy", "-movflags", "+faststart"].map(String::from));
            }
        }
        args.extend(["-loglevel".to_string(), "error".to_string(), output.to_string()]);
        args
    }
}

#[async_trait]
impl MediaConverter for FfmpegConverter {
    fn needs_conversion(&self, file: &UploadFile) -> bool {
        conversion_target(file).is_some()
    }

    #[tracing::instrument(skip(self, file), fields(file.name = %file.name, file.size = file.size()))]
    async fn convert(&self, file: &UploadFile) -> ProcessingResult<UploadFile> {
        let target = conversion_target(file).ok_or_else(|| {
            ProcessingError::Unsupported(format!(
                "{} ({}) needs no conversion",
                file.name, file.content_type
            ))
        })?;

        let start = std::time::Instant::now();

        let input_suffix = format!(".{}", file.extension());
        let input = tempfile::Builder::new().suffix(&input_suffix).tempfile()?;
        tokio::fs::write(input.path(), &file.data).await?;

        let output_suffix = format!(".{}", target.extension());
        let output = tempfile::Builder::new().suffix(&output_suffix).tempfile()?;

        let args = Self::ffmpeg_args(
            target,
            &input.path().to_string_lossy(),
            &output.path().to_string_lossy(),
        );
        self.ffmpeg.run(&args).await?;

        let data = tokio::fs::read(output.path()).await?;
        if data.is_empty() {
            return Err(ProcessingError::Ffmpeg(format!(
                "conversion of {} produced no output",
                file.name
            )));
        }

        let converted = UploadFile::new(
            file.with_extension(target.extension()),
            target.content_type(),
            Bytes::from(data),
        );

        tracing::info!(
            from = %file.content_type,
            to = %converted.content_type,
            input_bytes = file.size(),
            output_bytes = converted.size(),
            duration_ms = start.elapsed().as_millis(),
            "Converted file"
        );

        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content_type: &str) -> UploadFile {
        UploadFile::new(name, content_type, Bytes::from_static(b"data"))
    }

    #[test]
    fn test_conversion_target() {
        assert_eq!(conversion_target(&file("a.heic", "image/heic")), Some(Target::Jpeg));
        assert_eq!(conversion_target(&file("a.HEIF", "")), Some(Target::Jpeg));
        assert_eq!(conversion_target(&file("a.mov", "video/quicktime")), Some(Target::Mp4));
        assert_eq!(
            conversion_target(&file("a.MOV", "application/octet-stream")),
            Some(Target::Mp4)
        );
        assert_eq!(conversion_target(&file("a.jpg", "image/jpeg")), None);
        assert_eq!(conversion_target(&file("a.mp4", "video/mp4")), None);
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = FfmpegConverter::ffmpeg_args(Target::Mp4, "/tmp/in.mov", "/tmp/out.mp4");
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));

        let args = FfmpegConverter::ffmpeg_args(Target::Jpeg, "/tmp/in.heic", "/tmp/out.jpg");
        assert!(args.windows(2).any(|w| w[0] == "-frames:v" && w[1] == "1"));
    }

    #[tokio::test]
    async fn test_no_conversion_passes_through() {
        let original = file("a.heic", "image/heic");
        assert!(!NoConversion.needs_conversion(&original));
        let converted = NoConversion.convert(&original).await.unwrap();
        assert_eq!(converted, original);
    }

    #[tokio::test]
    async fn test_convert_rejects_files_without_target() {
        let converter = FfmpegConverter::new(Ffmpeg::new("ffmpeg", "ffprobe").unwrap());
        let result = converter.convert(&file("a.jpg", "image/jpeg")).await;
        assert!(matches!(result, Err(ProcessingError::Unsupported(_))));
    }
}
