//! Terminal stand-in for a media element: a result "loads" when the service
//! serves non-empty bytes of the expected media family.

use async_trait::async_trait;
use client_core::{InputPreview, RenderFailure, ResultRenderer};
use reqwest::{header::CONTENT_TYPE, Client};
use shared::domain::{MediaKind, SessionId};
use tracing::info;
use url::Url;

pub struct ProbeRenderer {
    http: Client,
    base_url: Url,
}

impl ProbeRenderer {
    pub fn new(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl ResultRenderer for ProbeRenderer {
    async fn preview_input(
        &self,
        session_id: SessionId,
        preview: &InputPreview,
    ) -> Result<(), RenderFailure> {
        match preview {
            InputPreview::Media { kind, data_url } => {
                info!(%session_id, %kind, data_url_len = data_url.len(), "input preview ready");
                Ok(())
            }
            InputPreview::Unsupported { mime_type } => Err(RenderFailure::new(format!(
                "cannot preview {mime_type}"
            ))),
        }
    }

    async fn mount(
        &self,
        session_id: SessionId,
        url: &str,
        kind: MediaKind,
    ) -> Result<(), RenderFailure> {
        let target = self
            .base_url
            .join(url)
            .map_err(|err| RenderFailure::new(format!("invalid media url: {err}")))?;
        let response = self
            .http
            .get(target)
            .send()
            .await
            .map_err(|err| RenderFailure::new(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderFailure::new(format!("media request returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if let Some(content_type) = &content_type {
            if MediaKind::from_mime(content_type) != Some(kind) {
                return Err(RenderFailure::new(format!(
                    "expected {kind} media, got {content_type}"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| RenderFailure::new(err.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderFailure::new("media body is empty"));
        }

        info!(%session_id, %kind, %url, bytes = bytes.len(), "result media loaded");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/renderer_tests.rs"]
mod tests;
