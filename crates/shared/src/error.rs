use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Transfer,
    Render,
    DownloadPrep,
}

/// Error body returned by the detection service on non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ServiceError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Non-blank `details` first, then `error`.
    pub fn message(&self) -> Option<&str> {
        self.details
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or_else(|| self.error.as_deref().filter(|text| !text.trim().is_empty()))
    }
}
