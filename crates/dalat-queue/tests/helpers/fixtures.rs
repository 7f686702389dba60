use bytes::Bytes;
use dalat_core::models::UploadFile;

/// A small JPEG whose payload is its own name, so fakes can tell files apart.
pub fn image(name: &str) -> UploadFile {
    UploadFile::new(name, "image/jpeg", Bytes::from(name.to_string()))
}

pub fn video(name: &str) -> UploadFile {
    UploadFile::new(name, "video/mp4", Bytes::from(name.to_string()))
}

pub fn images(count: usize) -> Vec<UploadFile> {
    (0..count).map(|i| image(&format!("photo-{}.jpg", i))).collect()
}
