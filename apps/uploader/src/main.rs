use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ControllerOptions, FsDownloadSink, HttpTransferClient, SelectedFile, SessionState,
    SystemClock, UploadLifecycleController,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod renderer;
mod report;

use config::{load_settings, normalize_server_url};
use renderer::ProbeRenderer;
use report::{describe_event, drain_lines};

#[derive(Parser, Debug)]
#[command(name = "detect-upload", about = "Submit images or MP4 videos to a detection service")]
struct Args {
    /// Files to submit, one session after another.
    #[arg(required = true)]
    files: Vec<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Skip saving the annotated result.
    #[arg(long)]
    no_download: bool,
    #[arg(long)]
    render_delay_ms: Option<u64>,
    #[arg(long)]
    retry_delay_ms: Option<u64>,
    /// Overrides the MIME type guessed from the file extension.
    #[arg(long)]
    mime_type: Option<String>,
}

async fn read_selection(path: &Path, mime_override: Option<&str>) -> Result<SelectedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no file name", path.display()))?;
    let mime_type = match mime_override {
        Some(mime) => mime.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    };
    Ok(SelectedFile::new(filename, mime_type, bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = &args.server_url {
        settings.server_url = normalize_server_url(server_url);
    }
    if let Some(dir) = args.download_dir.clone() {
        settings.download_dir = dir;
    }
    if let Some(ms) = args.render_delay_ms {
        settings.render_delay_ms = ms;
    }
    if let Some(ms) = args.retry_delay_ms {
        settings.retry_delay_ms = ms;
    }
    info!(server_url = %settings.server_url, "using detection service");

    let http = reqwest::Client::new();
    let transfer = Arc::new(HttpTransferClient::with_client(http.clone(), &settings.server_url)?);
    let renderer = Arc::new(ProbeRenderer::new(http, transfer.base_url().clone()));
    let sink = Arc::new(FsDownloadSink::new(settings.download_dir.clone()));
    let controller = UploadLifecycleController::new_with_dependencies(
        transfer,
        renderer,
        sink,
        Arc::new(SystemClock),
        ControllerOptions {
            render_delay: Duration::from_millis(settings.render_delay_ms),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            ..ControllerOptions::default()
        },
    );

    let mut events = controller.subscribe_events();

    let mut failed = 0usize;
    for path in &args.files {
        let file = match read_selection(path, args.mime_type.as_deref()).await {
            Ok(file) => file,
            Err(err) => {
                error!("{err:#}");
                failed += 1;
                continue;
            }
        };

        let finished = controller.select_file(file).await.finished();
        tokio::pin!(finished);
        loop {
            tokio::select! {
                _ = &mut finished => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(line) = describe_event(&event) {
                            println!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("skipped {skipped} upload events"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        for line in drain_lines(&mut events) {
            println!("{line}");
        }

        let Some(snapshot) = controller.snapshot().await else {
            continue;
        };
        if snapshot.state != SessionState::Completed {
            failed += 1;
            continue;
        }
        if args.no_download || !snapshot.download_enabled {
            continue;
        }
        match controller.download().await {
            Ok(saved) => println!("[{}] saved {}", snapshot.session_id, saved.display()),
            Err(err) => {
                error!("{err}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads failed", args.files.len());
    }
    Ok(())
}
