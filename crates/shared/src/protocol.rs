use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::MediaKind;

pub const UPLOAD_PATH: &str = "/upload";
pub const UPLOAD_FIELD_NAME: &str = "file";
pub const CACHE_BUSTER_PARAM: &str = "t";

/// Successful `POST /upload` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub result_path: String,
    /// Unrecognised values read as absent.
    #[serde(
        default,
        deserialize_with = "lenient_media_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_type: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<Detections>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl UploadResponse {
    pub fn new(result_path: impl Into<String>) -> Self {
        Self {
            result_path: result_path.into(),
            file_type: None,
            detections: None,
            success: None,
            original_file: None,
            error: None,
            details: None,
        }
    }
}

fn lenient_media_kind<'de, D>(deserializer: D) -> Result<Option<MediaKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
        "image" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        _ => None,
    }))
}

/// Videos report a total count, images report the individual boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detections {
    Count(u64),
    Records(Vec<DetectionRecord>),
}

impl Detections {
    pub fn total(&self) -> u64 {
        match self {
            Self::Count(count) => *count,
            Self::Records(records) => records.len() as u64,
        }
    }

    pub fn records(&self) -> &[DetectionRecord] {
        match self {
            Self::Count(_) => &[],
            Self::Records(records) => records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDetectionRecord")]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "boundingBox")]
    pub bounding_box: [f32; 4],
}

#[derive(Debug, Deserialize)]
struct RawDetectionRecord {
    label: String,
    confidence: f32,
    #[serde(rename = "boundingBox", alias = "bounding_box", alias = "bbox")]
    bounding_box: Vec<f32>,
}

impl TryFrom<RawDetectionRecord> for DetectionRecord {
    type Error = String;

    fn try_from(raw: RawDetectionRecord) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(format!(
                "detection '{}' has confidence {} outside [0, 1]",
                raw.label, raw.confidence
            ));
        }
        let bounding_box: [f32; 4] = raw.bounding_box.try_into().map_err(|coords: Vec<f32>| {
            format!(
                "detection '{}' bounding box needs 4 coordinates, got {}",
                raw.label,
                coords.len()
            )
        })?;
        Ok(Self {
            label: raw.label,
            confidence: raw.confidence,
            bounding_box,
        })
    }
}
