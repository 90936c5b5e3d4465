//! Derivative file classification.
//!
//! Derivative files are named `{prefix}-{kind}.{ext}`. The kind and the
//! extension together decide the use tag the destination backend records,
//! and the extension decides the content type.

use std::path::Path;

use crate::defaults::FALLBACK_MIME_TYPE;
use crate::models::UseTag;

/// Kinds and extensions that mark extracted text.
const TEXT_KINDS: &[&str] = &["txt", "json", "xml"];

/// The derivative kind: the part of the file stem after its last `-`.
///
/// `ab/cd/ef-thumbnail.jpg` → `thumbnail`; a stem without `-` is its own kind.
pub fn derivative_kind(path: &Path) -> Option<&str> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()
}

/// Map a derivative path to the use tag it is persisted under.
///
/// - kind `thumbnail` → [`UseTag::ThumbnailImage`]
/// - kind or extension in `txt`, `json`, `xml` → [`UseTag::ExtractedText`]
/// - anything else → [`UseTag::ServiceFile`]
pub fn container_for(path: &Path) -> UseTag {
    let kind = derivative_kind(path).map(str::to_ascii_lowercase);
    if kind.as_deref() == Some("thumbnail") {
        return UseTag::ThumbnailImage;
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let is_text = |v: &Option<String>| v.as_deref().is_some_and(|v| TEXT_KINDS.contains(&v));

    if is_text(&kind) || is_text(&extension) {
        UseTag::ExtractedText
    } else {
        UseTag::ServiceFile
    }
}

/// Content type for a derivative, from its extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_from_extension)
        .unwrap_or(FALLBACK_MIME_TYPE)
}

/// Content type for arbitrary bytes: magic bytes first, then the extension.
pub fn detect_content_type(filename: &str, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(mime_from_extension)
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        // Images
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "tif" | "tiff" => Some("image/tiff"),
        "webp" => Some("image/webp"),
        "jp2" => Some("image/jp2"),
        "svg" => Some("image/svg+xml"),
        // Text
        "txt" | "log" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "html" | "htm" => Some("text/html"),
        "xml" => Some("application/xml"),
        "json" => Some("application/json"),
        "vtt" => Some("text/vtt"),
        // Documents
        "pdf" => Some("application/pdf"),
        // Audio / video
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/x-wav"),
        "ogg" => Some("audio/ogg"),
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" => Some("video/quicktime"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn thumbnail_suffix_maps_to_thumbnail_image() {
        assert_eq!(container_for(&p("/d/ab/cd/ef-thumbnail.jpg")), UseTag::ThumbnailImage);
        assert_eq!(container_for(&p("x-thumbnail.jpeg")), UseTag::ThumbnailImage);
        assert_eq!(container_for(&p("x-THUMBNAIL.png")), UseTag::ThumbnailImage);
    }

    #[test]
    fn text_kinds_map_to_extracted_text() {
        assert_eq!(container_for(&p("/d/ab-fulltext.txt")), UseTag::ExtractedText);
        assert_eq!(container_for(&p("/d/ab-txt.txt")), UseTag::ExtractedText);
        assert_eq!(container_for(&p("/d/ab-json.json")), UseTag::ExtractedText);
        assert_eq!(container_for(&p("/d/ab-xml.xml")), UseTag::ExtractedText);
        assert_eq!(container_for(&p("/d/ab-extracted.txt")), UseTag::ExtractedText);
        assert_eq!(container_for(&p("/d/ab-ocr.xml")), UseTag::ExtractedText);
    }

    #[test]
    fn unknown_suffix_maps_to_service_file() {
        assert_eq!(container_for(&p("/d/ab-foo.bin")), UseTag::ServiceFile);
        assert_eq!(container_for(&p("/d/ab-access.mp4")), UseTag::ServiceFile);
        assert_eq!(container_for(&p("/d/ab-mp3.mp3")), UseTag::ServiceFile);
        assert_eq!(container_for(&p("noextension")), UseTag::ServiceFile);
    }

    #[test]
    fn kind_is_last_dash_segment_of_stem() {
        assert_eq!(derivative_kind(&p("/d/a-b-thumbnail.jpg")), Some("thumbnail"));
        assert_eq!(derivative_kind(&p("/d/plain.jpg")), Some("plain"));
        assert_eq!(container_for(&p("/d/thumbnail-extra.jpg")), UseTag::ServiceFile);
    }

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(mime_type_for(&p("x-thumbnail.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(&p("x-fulltext.txt")), "text/plain");
        assert_eq!(mime_type_for(&p("x-data.JSON")), "application/json");
        assert_eq!(mime_type_for(&p("x-foo.bin")), FALLBACK_MIME_TYPE);
        assert_eq!(mime_type_for(&p("x-foo")), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn detect_content_type_prefers_magic_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_content_type("mislabeled.txt", &png), "image/png");
        assert_eq!(detect_content_type("notes.txt", b"plain words"), "text/plain");
        assert_eq!(detect_content_type("blob", b"\x01\x02"), FALLBACK_MIME_TYPE);
    }
}
