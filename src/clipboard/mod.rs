//! Clipboard abstraction layer
//!
//! The sync engine reads outgoing text from and writes incoming text into the
//! platform clipboard through [`ClipboardProvider`]. [`ArboardClipboard`] is
//! the cross-platform implementation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// Clipboard provider trait
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Current clipboard text; empty when the clipboard holds no text
    async fn get_text(&self) -> Result<String, ClipboardError>;

    /// Replace the clipboard contents with `text`
    async fn set_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// The clipboard could not be opened
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    /// Blocking clipboard task failed
    #[error("Clipboard task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Clipboard backed by `arboard`
///
/// A single `arboard::Clipboard` is kept for the process lifetime; on X11 the
/// owning instance must stay alive for pasted content to remain available.
#[derive(Clone)]
pub struct ArboardClipboard {
    inner: Arc<Mutex<arboard::Clipboard>>,
}

impl ArboardClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(clipboard)),
        })
    }

    async fn with_clipboard<T, F>(&self, op: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, ClipboardError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut clipboard = inner
                .lock()
                .map_err(|_| ClipboardError::Platform("clipboard lock poisoned".to_string()))?;
            op(&mut clipboard)
        })
        .await?
    }
}

#[async_trait]
impl ClipboardProvider for ArboardClipboard {
    async fn get_text(&self) -> Result<String, ClipboardError> {
        self.with_clipboard(|clipboard| match clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(ClipboardError::Platform(e.to_string())),
        })
        .await
    }

    async fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let text = text.to_owned();
        self.with_clipboard(move |clipboard| {
            clipboard
                .set_text(text)
                .map_err(|e| ClipboardError::Platform(e.to_string()))
        })
        .await
    }

    fn name(&self) -> &str {
        "arboard"
    }
}
