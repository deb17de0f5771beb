use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Body, Client,
};
use shared::{
    error::ServiceError,
    protocol::{UploadResponse, UPLOAD_FIELD_NAME, UPLOAD_PATH},
};
use tracing::{debug, info};
use url::Url;

use crate::{
    error::TransferError,
    progress::{ByteProgress, ByteProgressSender},
    validation::normalize_mime_type,
    FetchedMedia, SelectedFile, TransferClient,
};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
const DETECTION_FAILED: &str = "Detection failed";

/// reqwest-backed client for the detection service.
pub struct HttpTransferClient {
    http: Client,
    base_url: Url,
}

impl HttpTransferClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let base_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid detection server url '{server_url}'"))?;
        // Upload and result paths are absolute, so a path prefix would be silently dropped.
        if base_url.path() != "/" {
            bail!(
                "detection server url '{server_url}' must not carry a path ('{}')",
                base_url.path()
            );
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resolve(&self, path: &str) -> Result<Url, TransferError> {
        self.base_url
            .join(path)
            .map_err(|err| TransferError::MalformedResponse(format!("bad result path '{path}': {err}")))
    }
}

/// Maps a raw `/upload` reply onto the session outcome.
pub fn parse_upload_response(status: u16, body: &str) -> Result<UploadResponse, TransferError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ServiceError>(body)
            .ok()
            .and_then(|error| error.message().map(str::to_string))
            .unwrap_or_else(|| TransferError::status_fallback(status));
        return Err(TransferError::Status { status, message });
    }

    let response: UploadResponse = serde_json::from_str(body)
        .map_err(|err| TransferError::MalformedResponse(err.to_string()))?;

    if response.success == Some(false) {
        let error = ServiceError {
            error: response.error.clone(),
            details: response.details.clone(),
        };
        return Err(TransferError::Rejected(
            error.message().unwrap_or(DETECTION_FAILED).to_string(),
        ));
    }

    Ok(response)
}

fn network_error(err: reqwest::Error) -> TransferError {
    TransferError::Network(err.to_string())
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    fn reports_byte_progress(&self) -> bool {
        true
    }

    async fn upload(
        &self,
        file: &SelectedFile,
        progress: Option<ByteProgressSender>,
    ) -> Result<UploadResponse, TransferError> {
        let url = self.resolve(UPLOAD_PATH)?;
        let total = file.bytes.len() as u64;
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(<[u8]>::to_vec)
            .collect();

        let mut sent = 0u64;
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(progress) = &progress {
                let _ = progress.send(ByteProgress { sent, total });
            }
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file.filename.clone())
            .mime_str(&normalize_mime_type(&file.mime_type))
            .map_err(|err| {
                TransferError::InvalidRequest(format!("content type '{}': {err}", file.mime_type))
            })?;
        let form = Form::new().part(UPLOAD_FIELD_NAME, part);

        info!(filename = %file.filename, bytes = total, %url, "uploading file");
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(network_error)?;
        debug!(status, "upload response received");

        parse_upload_response(status, &body)
    }

    async fn fetch_result(&self, url: &str) -> Result<FetchedMedia, TransferError> {
        let url = self.resolve(url)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                message: format!("Result fetch failed with status: {}", status.as_u16()),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(network_error)?;

        Ok(FetchedMedia {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
