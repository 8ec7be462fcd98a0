// Extension-based MIME helpers.
//
// These only look at the file name. `photo.jpg` becomes `image/jpg`, which is
// not on the image allow-list (the service expects `image/jpeg`), and
// extensions are compared case-sensitively.

use std::path::Path;

use crate::error::{CliError, Result};

pub const SUPPORTED_IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heif",
    "image/heic",
];

pub const SUPPORTED_VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/mov",
    "video/avi",
    "video/x-flv",
    "video/mpg",
    "video/webm",
    "video/wmv",
    "video/3gpp",
];

pub const SUPPORTED_AUDIO_MIME_TYPES: &[&str] = &[
    "audio/wav",
    "audio/mp3",
    "audio/aiff",
    "audio/aac",
    "audio/ogg",
    "audio/flac",
];

/// Text after the last `.`; the whole string when there is none.
pub fn get_file_extension(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Build `{format}/{extension}` for a path.
pub fn extract_mime_type(path: &str, format: &str) -> String {
    format!("{}/{}", format, get_file_extension(path))
}

pub fn validate_image_type(path: &str) -> bool {
    SUPPORTED_IMAGE_MIME_TYPES.contains(&extract_mime_type(path, "image").as_str())
}

pub fn validate_video_type(path: &str) -> bool {
    SUPPORTED_VIDEO_MIME_TYPES.contains(&extract_mime_type(path, "video").as_str())
}

pub fn validate_audio_type(path: &str) -> bool {
    SUPPORTED_AUDIO_MIME_TYPES.contains(&extract_mime_type(path, "audio").as_str())
}

/// First supported family (image, video, audio) that accepts the path's
/// extension.
pub fn detect_mime_type(path: &str) -> Option<String> {
    if validate_image_type(path) {
        Some(extract_mime_type(path, "image"))
    } else if validate_video_type(path) {
        Some(extract_mime_type(path, "video"))
    } else if validate_audio_type(path) {
        Some(extract_mime_type(path, "audio"))
    } else {
        None
    }
}

/// Image MIME type for an inline image, or `UnsupportedMediaType`.
pub fn require_image_type(path: &Path) -> Result<String> {
    let name = path.to_string_lossy();
    if validate_image_type(&name) {
        Ok(extract_mime_type(&name, "image"))
    } else {
        Err(CliError::UnsupportedMediaType(name.into_owned()))
    }
}

/// MIME type for an upload, or `UnsupportedMediaType`.
pub fn require_media_type(path: &Path) -> Result<String> {
    let name = path.to_string_lossy();
    detect_mime_type(&name).ok_or_else(|| CliError::UnsupportedMediaType(name.into_owned()))
}
