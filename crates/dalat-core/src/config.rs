//! Configuration module
//!
//! Settings for the upload queue, validation, media processing and storage, loaded
//! from the environment (a `.env` file is honoured through `dotenvy`).

use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_BUCKET, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES};
use crate::storage_types::StorageBackend;

const MAX_IMAGE_SIZE_MB: usize = 50;
const MAX_VIDEO_SIZE_MB: usize = 500;
const IMAGE_COMPRESS_THRESHOLD_MB: usize = 2;
const IMAGE_MAX_DIMENSION: u32 = 2048;
const IMAGE_JPEG_QUALITY: u8 = 82;
const VIDEO_COMPRESS_THRESHOLD_MB: usize = 50;
const VIDEO_TARGET_HEIGHT: u32 = 1080;
const VIDEO_CRF: u8 = 28;
const DEFAULT_RETRY_DELAYS_MS: &str = "1000,2000,4000";

/// Queue behaviour: concurrency, retry schedule and teardown.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delays: Vec<Duration>,
    /// Give a manually retried item a fresh retry budget.
    pub reset_retry_budget_on_manual_retry: bool,
    /// Failures marked non-recoverable skip the automatic retry schedule.
    pub skip_permanent_failures: bool,
    /// Cancel in-flight pipelines on shutdown instead of letting them finish.
    pub cancel_in_flight_on_shutdown: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delays: crate::constants::DEFAULT_RETRY_DELAYS.to_vec(),
            reset_retry_budget_on_manual_retry: false,
            skip_permanent_failures: false,
            cancel_in_flight_on_shutdown: false,
        }
    }
}

/// Accepted file types and sizes.
#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub max_image_size_bytes: usize,
    pub max_video_size_bytes: usize,
    pub image_allowed_extensions: Vec<String>,
    pub image_allowed_content_types: Vec<String>,
    pub video_allowed_extensions: Vec<String>,
    pub video_allowed_content_types: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_image_size_bytes: MAX_IMAGE_SIZE_MB * 1024 * 1024,
            max_video_size_bytes: MAX_VIDEO_SIZE_MB * 1024 * 1024,
            image_allowed_extensions: split_list("jpg,jpeg,png,gif,webp,heic,heif,avif"),
            image_allowed_content_types: split_list(
                "image/jpeg,image/png,image/gif,image/webp,image/heic,image/heif,image/avif",
            ),
            video_allowed_extensions: split_list("mp4,mov,m4v,webm"),
            video_allowed_content_types: split_list(
                "video/mp4,video/quicktime,video/x-m4v,video/webm",
            ),
        }
    }
}

/// Conversion and compression thresholds.
#[derive(Clone, Debug)]
pub struct ProcessingConfig {
    pub conversion_enabled: bool,
    pub compression_enabled: bool,
    pub image_compress_threshold_bytes: usize,
    pub image_max_dimension: u32,
    pub image_jpeg_quality: u8,
    pub video_compress_threshold_bytes: usize,
    pub video_target_height: u32,
    pub video_crf: u8,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            conversion_enabled: true,
            compression_enabled: true,
            image_compress_threshold_bytes: IMAGE_COMPRESS_THRESHOLD_MB * 1024 * 1024,
            image_max_dimension: IMAGE_MAX_DIMENSION,
            image_jpeg_quality: IMAGE_JPEG_QUALITY,
            video_compress_threshold_bytes: VIDEO_COMPRESS_THRESHOLD_MB * 1024 * 1024,
            video_target_height: VIDEO_TARGET_HEIGHT,
            video_crf: VIDEO_CRF,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

/// Where uploads land.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket: DEFAULT_BUCKET.to_string(),
            key_prefix: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: None,
            local_storage_base_url: None,
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub queue: QueueConfig,
    pub validation: ValidationConfig,
    pub processing: ProcessingConfig,
    pub storage: StorageConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let retry_delays = parse_delays(
            &env::var("UPLOAD_RETRY_DELAYS_MS")
                .unwrap_or_else(|_| DEFAULT_RETRY_DELAYS_MS.to_string()),
        )?;

        let queue = QueueConfig {
            max_concurrent: env_parse("UPLOAD_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT),
            max_retries: env_parse("UPLOAD_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_delays,
            reset_retry_budget_on_manual_retry: env_bool("UPLOAD_RESET_RETRY_BUDGET", false),
            skip_permanent_failures: env_bool("UPLOAD_SKIP_PERMANENT_FAILURES", false),
            cancel_in_flight_on_shutdown: env_bool("UPLOAD_CANCEL_IN_FLIGHT_ON_SHUTDOWN", false),
        };

        let validation = ValidationConfig {
            max_image_size_bytes: env_parse("MAX_IMAGE_SIZE_MB", MAX_IMAGE_SIZE_MB) * 1024 * 1024,
            max_video_size_bytes: env_parse("MAX_VIDEO_SIZE_MB", MAX_VIDEO_SIZE_MB) * 1024 * 1024,
            image_allowed_extensions: env_list(
                "IMAGE_ALLOWED_EXTENSIONS",
                defaults.validation.image_allowed_extensions,
            ),
            image_allowed_content_types: env_list(
                "IMAGE_ALLOWED_CONTENT_TYPES",
                defaults.validation.image_allowed_content_types,
            ),
            video_allowed_extensions: env_list(
                "VIDEO_ALLOWED_EXTENSIONS",
                defaults.validation.video_allowed_extensions,
            ),
            video_allowed_content_types: env_list(
                "VIDEO_ALLOWED_CONTENT_TYPES",
                defaults.validation.video_allowed_content_types,
            ),
        };

        let processing = ProcessingConfig {
            conversion_enabled: env_bool("UPLOAD_CONVERSION_ENABLED", true),
            compression_enabled: env_bool("UPLOAD_COMPRESSION_ENABLED", true),
            image_compress_threshold_bytes: env_parse(
                "IMAGE_COMPRESS_THRESHOLD_MB",
                IMAGE_COMPRESS_THRESHOLD_MB,
            ) * 1024
                * 1024,
            image_max_dimension: env_parse("IMAGE_MAX_DIMENSION", IMAGE_MAX_DIMENSION),
            image_jpeg_quality: env_parse("IMAGE_JPEG_QUALITY", IMAGE_JPEG_QUALITY),
            video_compress_threshold_bytes: env_parse(
                "VIDEO_COMPRESS_THRESHOLD_MB",
                VIDEO_COMPRESS_THRESHOLD_MB,
            ) * 1024
                * 1024,
            video_target_height: env_parse("VIDEO_TARGET_HEIGHT", VIDEO_TARGET_HEIGHT),
            video_crf: env_parse("VIDEO_CRF", VIDEO_CRF),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
        };

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let storage = StorageConfig {
            backend,
            bucket: env::var("UPLOAD_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            key_prefix: env::var("UPLOAD_KEY_PREFIX").ok().filter(|s| !s.is_empty()),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
        };

        let config = Config {
            queue,
            validation,
            processing,
            storage,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.queue.max_concurrent == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_MAX_CONCURRENT must be at least 1"
            ));
        }

        if self.queue.retry_delays.is_empty() {
            return Err(anyhow::anyhow!(
                "UPLOAD_RETRY_DELAYS_MS must list at least one delay"
            ));
        }

        if !(1..=100).contains(&self.processing.image_jpeg_quality) {
            return Err(anyhow::anyhow!(
                "IMAGE_JPEG_QUALITY must be between 1 and 100"
            ));
        }

        if self.processing.video_crf > 51 {
            return Err(anyhow::anyhow!("VIDEO_CRF must be between 0 and 51"));
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("UPLOAD_BUCKET must not be empty"));
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.storage.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|s| s.to_lowercase())
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    env::var(key).map(|s| split_list(&s)).unwrap_or(default)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma separated list of millisecond delays.
pub fn parse_delays(s: &str) -> Result<Vec<Duration>, anyhow::Error> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| anyhow::anyhow!("Invalid retry delay '{}': {}", part, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Config {
        let mut config = Config::default();
        config.storage.local_storage_path = Some("/tmp/dalat".to_string());
        config.storage.local_storage_base_url = Some("http://localhost:3000/media".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.retry_delays.len(), 3);
        assert!(!config.queue.reset_retry_budget_on_manual_retry);
        assert_eq!(config.storage.bucket, "moments");
    }

    #[test]
    fn test_parse_delays() {
        let delays = parse_delays("500, 1500,3000").unwrap();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1500),
                Duration::from_millis(3000)
            ]
        );
        assert!(parse_delays("100,abc").is_err());
        assert!(parse_delays("").unwrap().is_empty());
    }

    #[test]
    fn test_validate_ok() {
        assert!(local_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = local_config();
        config.queue.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_delays() {
        let mut config = local_config();
        config.queue.retry_delays.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let mut config = local_config();
        config.processing.image_jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_local_paths() {
        let mut config = local_config();
        config.storage.local_storage_base_url = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_s3_region() {
        let mut config = local_config();
        config.storage.backend = StorageBackend::S3;
        assert!(config.validate().is_err());
        config.storage.s3_region = Some("ap-southeast-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_list_normalizes() {
        assert_eq!(split_list(" JPG, png ,,"), vec!["jpg", "png"]);
    }
}
