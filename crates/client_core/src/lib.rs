use std::{io, path::PathBuf};

use async_trait::async_trait;
use shared::{domain::MediaKind, domain::SessionId, protocol::UploadResponse};

pub mod controller;
pub mod download;
pub mod error;
pub mod media;
pub mod progress;
pub mod transport;
pub mod validation;

pub use controller::{
    ControllerOptions, Notice, SessionHandle, SessionSnapshot, SessionState, UploadEvent,
    UploadLifecycleController,
};
pub use download::FsDownloadSink;
pub use error::{
    DownloadPrepError, RenderError, RenderFailure, SessionError, TransferError, ValidationError,
};
pub use media::InputPreview;
pub use progress::{ByteProgress, ByteProgressSender, ProgressStage, ProgressStrategy};
pub use transport::HttpTransferClient;

/// A file picked by the user, held fully in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Moves bytes to and from the detection service.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Whether `upload` emits byte progress on the sender it is given.
    fn reports_byte_progress(&self) -> bool;

    async fn upload(
        &self,
        file: &SelectedFile,
        progress: Option<ByteProgressSender>,
    ) -> Result<UploadResponse, TransferError>;

    async fn fetch_result(&self, url: &str) -> Result<FetchedMedia, TransferError>;
}

/// Displays input previews and result media.
///
/// `mount` resolves once the media has either loaded or failed; retrying is
/// left to the caller.
#[async_trait]
pub trait ResultRenderer: Send + Sync {
    async fn preview_input(
        &self,
        session_id: SessionId,
        preview: &InputPreview,
    ) -> Result<(), RenderFailure>;

    async fn mount(
        &self,
        session_id: SessionId,
        url: &str,
        kind: MediaKind,
    ) -> Result<(), RenderFailure>;
}

#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
