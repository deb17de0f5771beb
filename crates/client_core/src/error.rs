use shared::error::ErrorCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid file type '{mime_type}'. Please upload a JPEG or PNG image, or an MP4 video.")]
    InvalidType { mime_type: String },
    #[error("File '{filename}' is declared as {mime_type} but does not have a .mp4 extension.")]
    ExtensionMismatch { filename: String, mime_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("Malformed response from server: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Rejected(String),
    #[error("Could not build upload request: {0}")]
    InvalidRequest(String),
    #[error("Network error occurred while uploading: {0}")]
    Network(String),
}

impl TransferError {
    pub fn status_fallback(status: u16) -> String {
        format!("Upload failed with status: {status}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to load {kind} result from {url}: {reason}")]
pub struct RenderError {
    pub kind: shared::domain::MediaKind,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadPrepError {
    #[error("Download unavailable: could not fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("No result file available to download.")]
    NothingToDownload,
    #[error("Failed to save download '{filename}': {reason}")]
    Save { filename: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    DownloadPrep(#[from] DownloadPrepError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Transfer(_) => ErrorCode::Transfer,
            Self::Render(_) => ErrorCode::Render,
            Self::DownloadPrep(_) => ErrorCode::DownloadPrep,
        }
    }
}

/// Failure reported by a renderer when a media element could not load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RenderFailure(pub String);

impl RenderFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
