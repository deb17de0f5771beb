use client_core::{SessionState, UploadEvent};
use tokio::sync::broadcast::{error::TryRecvError, Receiver};
use tracing::warn;

/// Lines for every event already queued on `events`, in emission order.
pub fn drain_lines(events: &mut Receiver<UploadEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => lines.extend(describe_event(&event)),
            Err(TryRecvError::Lagged(skipped)) => warn!("skipped {skipped} upload events"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    lines
}

/// Terminal line for an event, if the user should see it.
pub fn describe_event(event: &UploadEvent) -> Option<String> {
    let line = match event {
        UploadEvent::SessionStarted {
            session_id,
            filename,
        } => format!("[{session_id}] selected {filename}"),
        UploadEvent::StateChanged { session_id, state } => match state {
            SessionState::Idle | SessionState::Validating | SessionState::Error => return None,
            other => format!("[{session_id}] {}", other.status_text()),
        },
        UploadEvent::Progress {
            session_id,
            percent,
        } => format!("[{session_id}] progress {percent}%"),
        UploadEvent::ProgressHidden { .. } => return None,
        UploadEvent::Notice { session_id, notice } => format!("[{session_id}] note: {notice}"),
        UploadEvent::DetectionsReady {
            session_id,
            summary,
        } => summary
            .iter()
            .map(|line| format!("[{session_id}] {line}"))
            .collect::<Vec<_>>()
            .join("\n"),
        UploadEvent::MediaMounted {
            session_id,
            url,
            kind,
        } => format!("[{session_id}] showing {kind} result at {url}"),
        UploadEvent::DownloadAvailability {
            session_id,
            enabled,
        } => {
            if *enabled {
                format!("[{session_id}] download ready")
            } else {
                return None;
            }
        }
        UploadEvent::Error { session_id, error } => format!("[{session_id}] error: {error}"),
    };
    Some(line)
}
