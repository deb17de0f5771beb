//! Upload/result lifecycle for one selected file at a time.
//!
//! Every asynchronous completion carries the `SessionId` it was issued for and
//! is dropped once a newer selection has replaced that session.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use shared::{
    domain::{MediaKind, SessionId},
    protocol::{Detections, UploadResponse},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{DownloadPrepError, RenderError, SessionError, TransferError},
    media::{
        cache_bust, classify_result, detection_summary, download_filename, input_preview,
        InputPreview,
    },
    progress::{
        default_schedule, observed_percent, staged_ticks, ProgressMeter, ProgressStage,
        ProgressStrategy, DEFAULT_PROGRESS_TICK,
    },
    validation::{normalize_mime_type, validate_selection},
    Clock, DownloadSink, ResultRenderer, SelectedFile, SystemClock, TransferClient,
};

pub const DEFAULT_RENDER_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);
const MAX_VIDEO_RENDER_ATTEMPTS: u32 = 2;
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub render_delay: Duration,
    pub retry_delay: Duration,
    pub progress_schedule: Vec<ProgressStage>,
    pub progress_tick: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            render_delay: DEFAULT_RENDER_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            progress_schedule: default_schedule(),
            progress_tick: DEFAULT_PROGRESS_TICK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    PreviewingInput,
    Uploading,
    AwaitingResult,
    Rendering,
    Completed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Validating)
            | (Validating, PreviewingInput)
            | (PreviewingInput, Uploading)
            | (Uploading, AwaitingResult)
            | (AwaitingResult, Rendering)
            | (Rendering, Completed) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn status_text(self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Validating => "Checking file...",
            Self::PreviewingInput => "Loading preview...",
            Self::Uploading => "Uploading...",
            Self::AwaitingResult | Self::Rendering => "Processing...",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PreviewUnavailable(String),
    RetryingRender { url: String },
    DownloadUnavailable(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreviewUnavailable(reason) => write!(f, "Preview unavailable: {reason}"),
            Self::RetryingRender { url } => {
                write!(f, "Video failed to load from {url}, retrying...")
            }
            Self::DownloadUnavailable(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    SessionStarted {
        session_id: SessionId,
        filename: String,
    },
    StateChanged {
        session_id: SessionId,
        state: SessionState,
    },
    Progress {
        session_id: SessionId,
        percent: u8,
    },
    ProgressHidden {
        session_id: SessionId,
    },
    Notice {
        session_id: SessionId,
        notice: Notice,
    },
    DetectionsReady {
        session_id: SessionId,
        summary: Vec<String>,
    },
    MediaMounted {
        session_id: SessionId,
        url: String,
        kind: MediaKind,
    },
    DownloadAvailability {
        session_id: SessionId,
        enabled: bool,
    },
    Error {
        session_id: SessionId,
        error: SessionError,
    },
}

impl UploadEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::ProgressHidden { session_id }
            | Self::Notice { session_id, .. }
            | Self::DetectionsReady { session_id, .. }
            | Self::MediaMounted { session_id, .. }
            | Self::DownloadAvailability { session_id, .. }
            | Self::Error { session_id, .. } => *session_id,
        }
    }
}

/// Read-only view of the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub filename: String,
    pub state: SessionState,
    /// `None` while the progress indicator is hidden.
    pub progress: Option<u8>,
    pub status: String,
    pub result_url: Option<String>,
    pub media_kind: Option<MediaKind>,
    pub detections: Option<Detections>,
    pub detection_summary: Vec<String>,
    pub notices: Vec<Notice>,
    pub error_message: Option<String>,
    pub download_enabled: bool,
}

pub struct SessionHandle {
    pub session_id: SessionId,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Waits until the session task stops touching the controller.
    pub async fn finished(self) {
        if let Some(task) = self.task {
            if let Err(err) = task.await {
                warn!(session_id = %self.session_id, "upload session task failed: {err}");
            }
        }
    }
}

#[derive(Clone)]
struct PreparedDownload {
    bytes: Arc<Vec<u8>>,
    content_type: Option<String>,
    url: String,
}

struct UploadSession {
    id: SessionId,
    filename: String,
    state: SessionState,
    meter: ProgressMeter,
    progress_visible: bool,
    result_url: Option<String>,
    media_kind: Option<MediaKind>,
    detections: Option<Detections>,
    detection_summary: Vec<String>,
    notices: Vec<Notice>,
    error: Option<SessionError>,
    download: Option<PreparedDownload>,
    last_cache_buster: i64,
}

impl UploadSession {
    fn new(id: SessionId, filename: String) -> Self {
        Self {
            id,
            filename,
            state: SessionState::Idle,
            meter: ProgressMeter::default(),
            progress_visible: false,
            result_url: None,
            media_kind: None,
            detections: None,
            detection_summary: Vec::new(),
            notices: Vec::new(),
            error: None,
            download: None,
            last_cache_buster: i64::MIN,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            filename: self.filename.clone(),
            state: self.state,
            progress: self.progress_visible.then(|| self.meter.current()),
            status: self.state.status_text().to_string(),
            result_url: self.result_url.clone(),
            media_kind: self.media_kind,
            detections: self.detections.clone(),
            detection_summary: self.detection_summary.clone(),
            notices: self.notices.clone(),
            error_message: self.error.as_ref().map(ToString::to_string),
            download_enabled: self.state == SessionState::Completed && self.download.is_some(),
        }
    }
}

struct ControllerState {
    last_issued: SessionId,
    current: Option<UploadSession>,
}

pub struct UploadLifecycleController {
    transfer: Arc<dyn TransferClient>,
    renderer: Arc<dyn ResultRenderer>,
    download_sink: Arc<dyn DownloadSink>,
    clock: Arc<dyn Clock>,
    options: ControllerOptions,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<UploadEvent>,
}

impl UploadLifecycleController {
    pub fn new(
        transfer: Arc<dyn TransferClient>,
        renderer: Arc<dyn ResultRenderer>,
        download_sink: Arc<dyn DownloadSink>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            transfer,
            renderer,
            download_sink,
            Arc::new(SystemClock),
            ControllerOptions::default(),
        )
    }

    pub fn new_with_dependencies(
        transfer: Arc<dyn TransferClient>,
        renderer: Arc<dyn ResultRenderer>,
        download_sink: Arc<dyn DownloadSink>,
        clock: Arc<dyn Clock>,
        options: ControllerOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transfer,
            renderer,
            download_sink,
            clock,
            options,
            inner: Mutex::new(ControllerState {
                last_issued: SessionId(0),
                current: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub async fn current_session_id(&self) -> Option<SessionId> {
        self.inner.lock().await.current.as_ref().map(|session| session.id)
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(UploadSession::snapshot)
    }

    /// Starts a fresh session for `file`, superseding any previous one.
    /// Validation runs before this returns; the rest runs on a spawned task.
    pub async fn select_file(self: &Arc<Self>, mut file: SelectedFile) -> SessionHandle {
        file.mime_type = normalize_mime_type(&file.mime_type);
        let session_id = {
            let mut guard = self.inner.lock().await;
            let session_id = guard.last_issued.next();
            guard.last_issued = session_id;
            if let Some(previous) = &guard.current {
                if !previous.state.is_terminal() {
                    info!(
                        previous = %previous.id,
                        session_id = %session_id,
                        "superseding in-flight upload session"
                    );
                }
            }
            guard.current = Some(UploadSession::new(session_id, file.filename.clone()));
            self.emit(UploadEvent::SessionStarted {
                session_id,
                filename: file.filename.clone(),
            });
            session_id
        };

        self.transition(session_id, SessionState::Validating).await;
        if let Err(err) = validate_selection(&file) {
            self.fail(session_id, err.into()).await;
            return SessionHandle {
                session_id,
                task: None,
            };
        }

        let task = tokio::spawn(Arc::clone(self).run_session(session_id, file));
        SessionHandle {
            session_id,
            task: Some(task),
        }
    }

    /// Saves the completed result of the current session, whichever it is.
    pub async fn download(&self) -> Result<PathBuf, DownloadPrepError> {
        let download = {
            let guard = self.inner.lock().await;
            guard
                .current
                .as_ref()
                .filter(|session| session.state == SessionState::Completed)
                .and_then(|session| session.download.clone())
                .ok_or(DownloadPrepError::NothingToDownload)?
        };

        let filename = download_filename(
            self.clock.now_millis(),
            download.content_type.as_deref(),
            &download.url,
        );
        self.download_sink
            .save(&filename, &download.bytes)
            .await
            .map_err(|err| DownloadPrepError::Save {
                filename,
                reason: err.to_string(),
            })
    }

    async fn run_session(self: Arc<Self>, session_id: SessionId, file: SelectedFile) {
        if !self
            .transition(session_id, SessionState::PreviewingInput)
            .await
        {
            return;
        }
        self.preview(session_id, &file).await;

        if !self.transition(session_id, SessionState::Uploading).await {
            return;
        }
        self.show_progress(session_id).await;

        let outcome = self.upload_with_progress(session_id, &file).await;
        if !self
            .transition(session_id, SessionState::AwaitingResult)
            .await
        {
            debug!(session_id = %session_id, "dropping upload outcome of superseded session");
            return;
        }

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.fail(session_id, err.into()).await;
                return;
            }
        };

        if !self.accept_response(session_id, &response).await {
            return;
        }
        if !self.transition(session_id, SessionState::Rendering).await {
            return;
        }
        self.render_result(session_id, response).await;
    }

    async fn preview(&self, session_id: SessionId, file: &SelectedFile) {
        let preview = input_preview(file);
        let outcome = match &preview {
            InputPreview::Unsupported { .. } => Err("Unsupported file type".to_string()),
            InputPreview::Media { .. } => self
                .renderer
                .preview_input(session_id, &preview)
                .await
                .map_err(|failure| failure.to_string()),
        };

        if let Err(reason) = outcome {
            warn!(session_id = %session_id, "input preview failed: {reason}");
            self.push_notice(session_id, Notice::PreviewUnavailable(reason))
                .await;
        }
    }

    async fn upload_with_progress(
        &self,
        session_id: SessionId,
        file: &SelectedFile,
    ) -> Result<UploadResponse, TransferError> {
        let strategy = ProgressStrategy::detect(
            self.transfer.reports_byte_progress(),
            &self.options.progress_schedule,
        );
        debug!(session_id = %session_id, ?strategy, "upload progress strategy");

        match strategy {
            ProgressStrategy::Observed => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let upload = self.transfer.upload(file, Some(tx));
                tokio::pin!(upload);
                loop {
                    tokio::select! {
                        outcome = &mut upload => {
                            while let Ok(progress) = rx.try_recv() {
                                self.report_progress(session_id, observed_percent(progress)).await;
                            }
                            break outcome;
                        }
                        Some(progress) = rx.recv() => {
                            self.report_progress(session_id, observed_percent(progress)).await;
                        }
                    }
                }
            }
            ProgressStrategy::Staged(schedule) => {
                let upload = self.transfer.upload(file, None);
                tokio::pin!(upload);
                let mut ticks = staged_ticks(&schedule, self.options.progress_tick).into_iter();
                loop {
                    let Some((delay, percent)) = ticks.next() else {
                        break (&mut upload).await;
                    };
                    tokio::select! {
                        outcome = &mut upload => break outcome,
                        _ = tokio::time::sleep(delay) => {
                            self.report_progress(session_id, percent).await;
                        }
                    }
                }
            }
        }
    }

    async fn accept_response(&self, session_id: SessionId, response: &UploadResponse) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(session) = current_session(&mut guard, session_id) else {
            return false;
        };

        if let Some(percent) = session.meter.complete() {
            self.emit(UploadEvent::Progress {
                session_id,
                percent,
            });
        }

        let kind = classify_result(response);
        session.media_kind = Some(kind);
        if let Some(detections) = &response.detections {
            let summary = detection_summary(detections);
            session.detections = Some(detections.clone());
            session.detection_summary = summary.clone();
            self.emit(UploadEvent::DetectionsReady {
                session_id,
                summary,
            });
        }
        info!(
            session_id = %session_id,
            result_path = %response.result_path,
            %kind,
            "upload accepted by detection service"
        );
        true
    }

    async fn render_result(&self, session_id: SessionId, response: UploadResponse) {
        let kind = classify_result(&response);

        tokio::time::sleep(self.options.render_delay).await;

        let mut attempt = 1;
        let mounted_url = loop {
            let Some(url) = self
                .next_cache_busted_url(session_id, &response.result_path)
                .await
            else {
                return;
            };

            let outcome = self.renderer.mount(session_id, &url, kind).await;
            if !self.is_current(session_id).await {
                debug!(session_id = %session_id, "dropping render outcome of superseded session");
                return;
            }

            match outcome {
                Ok(()) => break url,
                Err(failure) if kind == MediaKind::Video && attempt < MAX_VIDEO_RENDER_ATTEMPTS => {
                    warn!(session_id = %session_id, %url, "video failed to load, retrying: {failure}");
                    self.push_notice(session_id, Notice::RetryingRender { url })
                        .await;
                    tokio::time::sleep(self.options.retry_delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    let error = RenderError {
                        kind,
                        url,
                        reason: failure.to_string(),
                    };
                    self.fail(session_id, error.into()).await;
                    return;
                }
            }
        };

        {
            let mut guard = self.inner.lock().await;
            let Some(session) = current_session(&mut guard, session_id) else {
                return;
            };
            session.result_url = Some(mounted_url.clone());
            self.emit(UploadEvent::MediaMounted {
                session_id,
                url: mounted_url.clone(),
                kind,
            });
        }

        let download = self.prepare_download(session_id, &mounted_url).await;
        self.complete(session_id, download).await;
    }

    async fn prepare_download(
        &self,
        session_id: SessionId,
        url: &str,
    ) -> Result<PreparedDownload, DownloadPrepError> {
        match self.transfer.fetch_result(url).await {
            Ok(media) => Ok(PreparedDownload {
                bytes: Arc::new(media.bytes),
                content_type: media.content_type,
                url: url.to_string(),
            }),
            Err(err) => {
                warn!(session_id = %session_id, %url, "download preparation failed: {err}");
                Err(DownloadPrepError::Fetch {
                    url: url.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn complete(
        &self,
        session_id: SessionId,
        download: Result<PreparedDownload, DownloadPrepError>,
    ) {
        let mut guard = self.inner.lock().await;
        let Some(session) = current_session(&mut guard, session_id) else {
            return;
        };
        if !self.apply_transition(session, SessionState::Completed) {
            return;
        }

        session.progress_visible = false;
        self.emit(UploadEvent::ProgressHidden { session_id });

        let enabled = match download {
            Ok(download) => {
                session.download = Some(download);
                true
            }
            Err(err) => {
                let notice = Notice::DownloadUnavailable(err.to_string());
                session.notices.push(notice.clone());
                self.emit(UploadEvent::Notice { session_id, notice });
                false
            }
        };
        self.emit(UploadEvent::DownloadAvailability {
            session_id,
            enabled,
        });
        info!(session_id = %session_id, download_enabled = enabled, "upload session completed");
    }

    async fn fail(&self, session_id: SessionId, error: SessionError) {
        let mut guard = self.inner.lock().await;
        let Some(session) = current_session(&mut guard, session_id) else {
            debug!(session_id = %session_id, "dropping failure of superseded session: {error}");
            return;
        };
        if !self.apply_transition(session, SessionState::Error) {
            return;
        }

        warn!(session_id = %session_id, code = ?error.code(), "upload session failed: {error}");
        session.download = None;
        session.error = Some(error.clone());
        if session.progress_visible {
            session.progress_visible = false;
            self.emit(UploadEvent::ProgressHidden { session_id });
        }
        self.emit(UploadEvent::DownloadAvailability {
            session_id,
            enabled: false,
        });
        self.emit(UploadEvent::Error { session_id, error });
    }

    async fn transition(&self, session_id: SessionId, next: SessionState) -> bool {
        let mut guard = self.inner.lock().await;
        match current_session(&mut guard, session_id) {
            Some(session) => self.apply_transition(session, next),
            None => false,
        }
    }

    fn apply_transition(&self, session: &mut UploadSession, next: SessionState) -> bool {
        if !session.state.can_transition_to(next) {
            warn!(
                session_id = %session.id,
                from = ?session.state,
                to = ?next,
                "rejected upload session transition"
            );
            return false;
        }
        debug!(session_id = %session.id, from = ?session.state, to = ?next, "upload session transition");
        session.state = next;
        self.emit(UploadEvent::StateChanged {
            session_id: session.id,
            state: next,
        });
        true
    }

    async fn show_progress(&self, session_id: SessionId) {
        let mut guard = self.inner.lock().await;
        if let Some(session) = current_session(&mut guard, session_id) {
            session.progress_visible = true;
            self.emit(UploadEvent::Progress {
                session_id,
                percent: session.meter.current(),
            });
        }
    }

    async fn report_progress(&self, session_id: SessionId, percent: u8) {
        let mut guard = self.inner.lock().await;
        let Some(session) = current_session(&mut guard, session_id) else {
            return;
        };
        if session.state != SessionState::Uploading {
            return;
        }
        if let Some(percent) = session.meter.advance(percent) {
            self.emit(UploadEvent::Progress {
                session_id,
                percent,
            });
        }
    }

    async fn push_notice(&self, session_id: SessionId, notice: Notice) {
        let mut guard = self.inner.lock().await;
        if let Some(session) = current_session(&mut guard, session_id) {
            session.notices.push(notice.clone());
            self.emit(UploadEvent::Notice { session_id, notice });
        }
    }

    /// Each render attempt gets a strictly newer cache-buster.
    async fn next_cache_busted_url(&self, session_id: SessionId, path: &str) -> Option<String> {
        let mut guard = self.inner.lock().await;
        let session = current_session(&mut guard, session_id)?;
        let stamp = self
            .clock
            .now_millis()
            .max(session.last_cache_buster.saturating_add(1));
        session.last_cache_buster = stamp;
        Some(cache_bust(path, stamp))
    }

    async fn is_current(&self, session_id: SessionId) -> bool {
        self.current_session_id().await == Some(session_id)
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }
}

fn current_session(state: &mut ControllerState, session_id: SessionId) -> Option<&mut UploadSession> {
    state
        .current
        .as_mut()
        .filter(|session| session.id == session_id)
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
