use crate::error::{ProcessingError, ProcessingResult};
use crate::video::VideoCompression;
use async_trait::async_trait;
use bytes::Bytes;
use dalat_core::models::UploadFile;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader};
use std::io::Cursor;
use tokio::sync::mpsc;

/// Formats the recompressor can decode. GIF is left alone so animations survive.
const RECOMPRESSIBLE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

#[async_trait]
pub trait ImageCompression: Send + Sync {
    fn should_compress(&self, file: &UploadFile) -> bool;

    async fn compress(&self, file: &UploadFile) -> ProcessingResult<UploadFile>;
}

/// Skips compression for both images and videos.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

#[async_trait]
impl ImageCompression for NoCompression {
    fn should_compress(&self, _file: &UploadFile) -> bool {
        false
    }

    async fn compress(&self, file: &UploadFile) -> ProcessingResult<UploadFile> {
        Ok(file.clone())
    }
}

#[async_trait]
impl VideoCompression for NoCompression {
    fn should_compress(&self, _file: &UploadFile) -> bool {
        false
    }

    async fn compress(
        &self,
        file: &UploadFile,
        _progress: mpsc::Sender<u8>,
    ) -> ProcessingResult<UploadFile> {
        Ok(file.clone())
    }
}

/// Downsizes large photos and re-encodes them as progressive JPEG with mozjpeg.
#[derive(Debug, Clone)]
pub struct JpegRecompressor {
    threshold_bytes: usize,
    max_dimension: u32,
    quality: u8,
}

impl JpegRecompressor {
    pub fn new(threshold_bytes: usize, max_dimension: u32, quality: u8) -> Self {
        Self {
            threshold_bytes,
            max_dimension,
            quality: quality.clamp(1, 100),
        }
    }

    fn exceeds_dimensions(&self, data: &[u8]) -> bool {
        ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .map(|(width, height)| width > self.max_dimension || height > self.max_dimension)
            .unwrap_or(false)
    }

    /// Decode, apply EXIF orientation, fit within the max dimension and encode.
    /// Blocking; run on the blocking pool.
    fn recompress(data: &[u8], max_dimension: u32, quality: u8) -> ProcessingResult<Vec<u8>> {
        let img = decode_oriented(data)?;

        let (width, height) = img.dimensions();
        let img = if width > max_dimension || height > max_dimension {
            img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
        } else {
            img
        };

        encode_jpeg(&img, quality)
    }
}

fn decode_oriented(data: &[u8]) -> ProcessingResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;

    let orientation = decoder.orientation().ok();
    let mut img =
        DynamicImage::from_decoder(decoder).map_err(|e| ProcessingError::Decode(e.to_string()))?;
    if let Some(orientation) = orientation {
        img.apply_orientation(orientation);
    }

    Ok(img)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> ProcessingResult<Vec<u8>> {
    let rgb_img = img.to_rgb8();
    let (width, height) = rgb_img.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality as f32);
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);

    let mut comp = comp
        .start_compress(Vec::new())
        .map_err(|e| ProcessingError::Encode(e.to_string()))?;
    comp.write_scanlines(&rgb_img)
        .map_err(|e| ProcessingError::Encode(e.to_string()))?;
    comp.finish()
        .map_err(|e| ProcessingError::Encode(e.to_string()))
}

#[async_trait]
impl ImageCompression for JpegRecompressor {
    fn should_compress(&self, file: &UploadFile) -> bool {
        if !RECOMPRESSIBLE_TYPES.contains(&file.content_type.as_str()) {
            return false;
        }
        file.size() > self.threshold_bytes || self.exceeds_dimensions(&file.data)
    }

    #[tracing::instrument(skip(self, file), fields(file.name = %file.name, file.size = file.size()))]
    async fn compress(&self, file: &UploadFile) -> ProcessingResult<UploadFile> {
        let start = std::time::Instant::now();
        let data = file.data.clone();
        let max_dimension = self.max_dimension;
        let quality = self.quality;

        let encoded =
            tokio::task::spawn_blocking(move || Self::recompress(&data, max_dimension, quality))
                .await??;

        if encoded.len() >= file.size() {
            tracing::debug!(
                input_bytes = file.size(),
                output_bytes = encoded.len(),
                "Recompressed image is not smaller, keeping original"
            );
            return Ok(file.clone());
        }

        let compressed = UploadFile::new(
            file.with_extension("jpg"),
            "image/jpeg",
            Bytes::from(encoded),
        );

        tracing::info!(
            input_bytes = file.size(),
            output_bytes = compressed.size(),
            duration_ms = start.elapsed().as_millis(),
            "Compressed image"
        );

        Ok(compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8]);
        }
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        Bytes::from(buffer)
    }

    #[test]
    fn test_should_compress_by_size_or_dimension() {
        let compressor = JpegRecompressor::new(1024 * 1024, 64, 80);

        let small = UploadFile::new("small.png", "image/png", png_bytes(32, 32));
        assert!(!compressor.should_compress(&small));

        let wide = UploadFile::new("wide.png", "image/png", png_bytes(128, 16));
        assert!(compressor.should_compress(&wide));

        let gif = UploadFile::new("anim.gif", "image/gif", png_bytes(128, 128));
        assert!(!compressor.should_compress(&gif));

        let big_threshold = JpegRecompressor::new(10, 4096, 80);
        assert!(big_threshold.should_compress(&small));
    }

    #[tokio::test]
    async fn test_compress_downsizes_to_max_dimension() {
        let compressor = JpegRecompressor::new(0, 100, 80);
        let file = UploadFile::new("photo.png", "image/png", png_bytes(400, 200));

        let compressed = compressor.compress(&file).await.unwrap();

        assert_eq!(compressed.name, "photo.jpg");
        assert_eq!(compressed.content_type, "image/jpeg");
        let img = image::load_from_memory(&compressed.data).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[tokio::test]
    async fn test_compress_keeps_original_when_not_smaller() {
        let compressor = JpegRecompressor::new(0, 4096, 100);
        let noisy = image::load_from_memory(&png_bytes(64, 64)).unwrap();
        let encoded = encode_jpeg(&noisy, 10).unwrap();
        let file = UploadFile::new("tiny.jpg", "image/jpeg", Bytes::from(encoded));

        let result = compressor.compress(&file).await.unwrap();
        assert_eq!(result, file);
    }

    #[tokio::test]
    async fn test_compress_rejects_garbage() {
        let compressor = JpegRecompressor::new(0, 100, 80);
        let file = UploadFile::new("bad.jpg", "image/jpeg", Bytes::from_static(b"not an image"));

        let result = compressor.compress(&file).await;
        assert!(matches!(result, Err(ProcessingError::Decode(_))));
    }

    #[tokio::test]
    async fn test_no_compression() {
        let file = UploadFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"abc"));
        assert!(!ImageCompression::should_compress(&NoCompression, &file));
        assert_eq!(ImageCompression::compress(&NoCompression, &file).await.unwrap(), file);
    }
}
