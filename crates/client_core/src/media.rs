use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    domain::MediaKind,
    protocol::{Detections, UploadResponse, CACHE_BUSTER_PARAM},
};

use crate::{validation::normalize_mime_type, SelectedFile};

pub const VIDEO_RESULT_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "wmv", "mkv", "webm"];
const DEFAULT_VIDEO_EXTENSION: &str = "mp4";
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPreview {
    Media { kind: MediaKind, data_url: String },
    Unsupported { mime_type: String },
}

pub fn input_preview(file: &SelectedFile) -> InputPreview {
    let mime_type = normalize_mime_type(&file.mime_type);
    match MediaKind::from_mime(&mime_type) {
        Some(kind) => InputPreview::Media {
            kind,
            data_url: data_url(&mime_type, &file.bytes),
        },
        None => InputPreview::Unsupported { mime_type },
    }
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// `file_type` decides when present; otherwise the extension of `result_path`.
pub fn classify_result(response: &UploadResponse) -> MediaKind {
    if let Some(kind) = response.file_type {
        return kind;
    }
    match url_extension(&response.result_path) {
        Some(ext) if VIDEO_RESULT_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// Lowercased trailing extension of a URL path, ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or_default();
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn cache_bust(url: &str, stamp: i64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{CACHE_BUSTER_PARAM}={stamp}")
}

/// `output_<timestamp>.<ext>`: video results take the MIME subtype, everything
/// else takes the URL extension.
pub fn download_filename(timestamp: i64, content_type: Option<&str>, url: &str) -> String {
    let video_subtype = content_type
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .and_then(|mime| mime.strip_prefix("video/").map(str::to_string));

    let ext = match video_subtype {
        Some(subtype) if !subtype.is_empty() => subtype,
        Some(_) => DEFAULT_VIDEO_EXTENSION.to_string(),
        None => url_extension(url).unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string()),
    };
    format!("output_{timestamp}.{ext}")
}

pub fn detection_summary(detections: &Detections) -> Vec<String> {
    let mut lines = vec![format!("Total Detections: {}", detections.total())];
    for record in detections.records() {
        let [x1, y1, x2, y2] = record.bounding_box;
        lines.push(format!(
            "{} ({:.1}%) [{x1}, {y1}, {x2}, {y2}]",
            record.label,
            record.confidence * 100.0
        ));
    }
    lines
}
