//! Shared key generation for storage backends.
//!
//! Key format: `{yyyy}/{mm}/{uuid}.{ext}`, optionally under a prefix.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a storage key for a file.
///
/// The prefix is sanitised to lower-case alphanumerics, `-` and `_` per segment so a
/// caller-provided slug cannot produce `..` or absolute keys.
pub fn generate_storage_key(
    prefix: Option<&str>,
    file_id: Uuid,
    extension: &str,
    now: DateTime<Utc>,
) -> String {
    let date = now.format("%Y/%m");
    let extension = sanitize_segment(extension);
    let file_name = if extension.is_empty() {
        file_id.to_string()
    } else {
        format!("{}.{}", file_id, extension)
    };

    match prefix.map(sanitize_prefix).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}/{}", prefix, date, file_name),
        None => format!("{}/{}", date, file_name),
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .split('/')
        .map(sanitize_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
