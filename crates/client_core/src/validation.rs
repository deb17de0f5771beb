use shared::domain::MediaKind;

use crate::{error::ValidationError, SelectedFile};

pub const ACCEPTED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];
pub const ACCEPTED_VIDEO_TYPE: &str = "video/mp4";
const REQUIRED_VIDEO_EXTENSION: &str = ".mp4";

/// Canonical form of a declared MIME type: trimmed and lowercased.
pub fn normalize_mime_type(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Checks the declared MIME type, and for video the literal `.mp4` extension.
pub fn validate_selection(file: &SelectedFile) -> Result<MediaKind, ValidationError> {
    let mime_type = normalize_mime_type(&file.mime_type);

    if ACCEPTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
        return Ok(MediaKind::Image);
    }

    if mime_type == ACCEPTED_VIDEO_TYPE {
        if !file.filename.ends_with(REQUIRED_VIDEO_EXTENSION) {
            return Err(ValidationError::ExtensionMismatch {
                filename: file.filename.clone(),
                mime_type,
            });
        }
        return Ok(MediaKind::Video);
    }

    Err(ValidationError::InvalidType {
        mime_type: file.mime_type.clone(),
    })
}
