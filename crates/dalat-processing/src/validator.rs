use dalat_core::config::ValidationConfig;
use dalat_core::models::{content_type_for_name, UploadFile};
use std::path::Path;

/// Common validation errors for media files
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Empty file")]
    EmptyFile,
}

/// Admission check run before a file enters the queue.
pub trait FileValidator: Send + Sync {
    fn validate(&self, file: &UploadFile) -> Result<(), ValidationError>;
}

/// Media file validator
///
/// Checks size, extension and content type against one set of rules.
#[derive(Debug, Clone)]
pub struct MediaValidator {
    max_file_size: usize,
    allowed_extensions: Vec<String>,
    allowed_content_types: Vec<String>,
}

impl MediaValidator {
    pub fn new(
        max_file_size: usize,
        allowed_extensions: Vec<String>,
        allowed_content_types: Vec<String>,
    ) -> Self {
        Self {
            max_file_size,
            allowed_extensions,
            allowed_content_types,
        }
    }

    /// Validate file size
    pub fn validate_file_size(&self, size: usize) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Validate file extension
    pub fn validate_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(())
    }

    /// Validate content type
    pub fn validate_content_type(&self, content_type: &str) -> Result<(), ValidationError> {
        let normalized = content_type.to_lowercase();

        if !self
            .allowed_content_types
            .iter()
            .any(|ct| ct == &normalized)
        {
            return Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_content_types.clone(),
            });
        }

        Ok(())
    }

    /// Validate that Content-Type matches the file extension, so a renamed file
    /// cannot pass as another format.
    pub fn validate_extension_content_type_match(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;
        let normalized_content_type = content_type.to_lowercase();

        let expected_content_types: &[&str] = match extension.as_str() {
            "jpg" | "jpeg" => &["image/jpeg"],
            "png" => &["image/png"],
            "gif" => &["image/gif"],
            "webp" => &["image/webp"],
            "avif" => &["image/avif"],
            // iOS reports HEIC captures under either name
            "heic" | "heif" => &["image/heic", "image/heif"],
            "mp4" => &["video/mp4"],
            "m4v" => &["video/x-m4v", "video/mp4"],
            "mov" => &["video/quicktime"],
            "webm" => &["video/webm"],
            _ => {
                tracing::debug!(
                    extension = %extension,
                    content_type = %content_type,
                    "Unknown extension, skipping Content-Type/extension cross-validation"
                );
                return Ok(());
            }
        };

        if !expected_content_types
            .iter()
            .any(|ct| *ct == normalized_content_type)
        {
            return Err(ValidationError::InvalidContentType {
                content_type: format!(
                    "{} (does not match extension '{}'. Expected one of: {})",
                    content_type,
                    extension,
                    expected_content_types.join(", ")
                ),
                allowed: self.allowed_content_types.clone(),
            });
        }

        Ok(())
    }

    /// Validate all aspects of a file, including Content-Type/extension matching
    pub fn validate_all(
        &self,
        filename: &str,
        content_type: &str,
        file_size: usize,
    ) -> Result<(), ValidationError> {
        self.validate_file_size(file_size)?;
        self.validate_extension(filename)?;
        self.validate_content_type(content_type)?;
        self.validate_extension_content_type_match(filename, content_type)?;
        Ok(())
    }
}

impl FileValidator for MediaValidator {
    fn validate(&self, file: &UploadFile) -> Result<(), ValidationError> {
        self.validate_all(&file.name, &effective_content_type(file), file.size())
    }
}

/// Picks the image or the video rules depending on what the file is.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    image: MediaValidator,
    video: MediaValidator,
}

impl UploadValidator {
    pub fn new(image: MediaValidator, video: MediaValidator) -> Self {
        Self { image, video }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            image: MediaValidator::new(
                config.max_image_size_bytes,
                config.image_allowed_extensions.clone(),
                config.image_allowed_content_types.clone(),
            ),
            video: MediaValidator::new(
                config.max_video_size_bytes,
                config.video_allowed_extensions.clone(),
                config.video_allowed_content_types.clone(),
            ),
        }
    }
}

impl FileValidator for UploadValidator {
    fn validate(&self, file: &UploadFile) -> Result<(), ValidationError> {
        if file.is_video() {
            self.video.validate(file)
        } else if file.is_image() {
            self.image.validate(file)
        } else {
            Err(ValidationError::UnsupportedMediaType(
                if file.content_type.is_empty() {
                    file.name.clone()
                } else {
                    file.content_type.clone()
                },
            ))
        }
    }
}

fn extension_of(filename: &str) -> Result<String, ValidationError> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ValidationError::InvalidFilename(filename.to_string()))
}

/// Files picked from disk often carry no content type; fall back to the extension.
fn effective_content_type(file: &UploadFile) -> String {
    if file.content_type.is_empty() || file.content_type == "application/octet-stream" {
        content_type_for_name(&file.name).to_string()
    } else {
        file.content_type.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_validator() -> MediaValidator {
        MediaValidator::new(
            1024 * 1024, // 1MB
            vec!["jpg".to_string(), "png".to_string()],
            vec!["image/jpeg".to_string(), "image/png".to_string()],
        )
    }

    fn file(name: &str, content_type: &str, size: usize) -> UploadFile {
        UploadFile::new(name, content_type, Bytes::from(vec![0u8; size]))
    }

    #[test]
    fn test_validate_file_size() {
        let validator = test_validator();
        assert!(validator.validate_file_size(512 * 1024).is_ok());
        assert!(validator.validate_file_size(2 * 1024 * 1024).is_err());
        assert_eq!(
            validator.validate_file_size(0),
            Err(ValidationError::EmptyFile)
        );
    }

    #[test]
    fn test_validate_extension() {
        let validator = test_validator();
        assert!(validator.validate_extension("test.jpg").is_ok());
        assert!(validator.validate_extension("test.PNG").is_ok()); // case insensitive
        assert!(validator.validate_extension("test.gif").is_err());
        assert!(matches!(
            validator.validate_extension("noext"),
            Err(ValidationError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_validate_content_type() {
        let validator = test_validator();
        assert!(validator.validate_content_type("IMAGE/PNG").is_ok());
        assert!(validator.validate_content_type("image/gif").is_err());
    }

    #[test]
    fn test_validate_extension_content_type_match() {
        let validator = test_validator();
        assert!(validator
            .validate_extension_content_type_match("test.jpeg", "image/jpeg")
            .is_ok());
        assert!(validator
            .validate_extension_content_type_match("test.jpg", "image/png")
            .is_err());
        assert!(validator
            .validate_extension_content_type_match("IMG_1.HEIC", "image/heif")
            .is_ok());
        assert!(validator
            .validate_extension_content_type_match("clip.mov", "video/mp4")
            .is_err());
    }

    #[test]
    fn test_media_validator_uses_extension_when_content_type_missing() {
        let validator = test_validator();
        assert!(validator.validate(&file("photo.jpg", "", 10)).is_ok());
        assert!(validator.validate(&file("photo.gif", "", 10)).is_err());
    }

    #[test]
    fn test_upload_validator_routes_by_media_kind() {
        let validator = UploadValidator::from_config(&ValidationConfig::default());

        assert!(validator.validate(&file("IMG_0001.HEIC", "image/heic", 10)).is_ok());
        assert!(validator.validate(&file("IMG_0002.MOV", "video/quicktime", 10)).is_ok());
        assert!(validator.validate(&file("clip.mp4", "", 10)).is_ok());
        assert!(matches!(
            validator.validate(&file("notes.txt", "text/plain", 10)),
            Err(ValidationError::UnsupportedMediaType(_))
        ));
        assert_eq!(
            validator.validate(&file("empty.jpg", "image/jpeg", 0)),
            Err(ValidationError::EmptyFile)
        );
    }

    #[test]
    fn test_upload_validator_applies_video_size_limit() {
        let validator = UploadValidator::new(
            MediaValidator::new(100, vec!["jpg".into()], vec!["image/jpeg".into()]),
            MediaValidator::new(10, vec!["mp4".into()], vec!["video/mp4".into()]),
        );

        assert!(validator.validate(&file("a.jpg", "image/jpeg", 50)).is_ok());
        assert!(matches!(
            validator.validate(&file("a.mp4", "video/mp4", 50)),
            Err(ValidationError::FileTooLarge { size: 50, max: 10 })
        ));
    }
}
