//! Publishing the local clipboard to the relay
//!
//! One hotkey press produces at most one `PUT` to the topic. Delivery is best
//! effort: failures are reported to the caller and never retried.

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::clipboard::{ClipboardError, ClipboardProvider};
use crate::config::Config;
use crate::transport::RelayEndpoint;

/// Header carrying the publisher's client name
pub const TITLE_HEADER: &str = "Title";

/// Publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    /// Reading the clipboard failed
    #[error("Could not read clipboard: {0}")]
    Source(#[from] ClipboardError),

    /// The request could not be built or sent
    #[error("Publish request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The relay answered with a non-success status
    #[error("Relay rejected publish with status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// What a publish attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Clipboard was empty; no request was made
    Skipped,

    /// Relay accepted the text
    Published(StatusCode),
}

/// Sends clipboard text to the relay topic
#[derive(Debug, Clone)]
pub struct Publisher {
    client: reqwest::Client,
    url: String,
    client_name: String,
    token: Option<String>,
}

impl Publisher {
    pub fn new(config: &Config) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: RelayEndpoint::from_config(config).publish_url(),
            client_name: config.client_name.clone(),
            token: config.bearer_token().map(str::to_string),
        })
    }

    /// Publish whatever text `source` currently holds
    pub async fn publish_from(
        &self,
        source: &dyn ClipboardProvider,
    ) -> Result<PublishOutcome, PublishError> {
        let text = source.get_text().await?;
        self.publish_text(&text).await
    }

    /// Publish `text`; empty text is skipped
    pub async fn publish_text(&self, text: &str) -> Result<PublishOutcome, PublishError> {
        if text.is_empty() {
            debug!("Clipboard is empty, nothing to publish");
            return Ok(PublishOutcome::Skipped);
        }

        let mut request = self
            .client
            .put(&self.url)
            .header(TITLE_HEADER, &self.client_name)
            .body(text.to_owned());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("Could not read error response from {}: {}", self.url, e);
                    String::new()
                }
            };
            return Err(PublishError::Status { status, body });
        }

        // the relay echoes the stored message; only the status matters
        if let Err(e) = response.bytes().await {
            debug!("Could not read publish response from {}: {}", self.url, e);
        }

        info!("Published {} bytes to {}", text.len(), self.url);
        Ok(PublishOutcome::Published(status))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
