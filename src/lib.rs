//! # cloudclip
//!
//! Clipboard synchronization through an ntfy-style publish/subscribe relay.
//!
//! Pressing the configured hotkey publishes the local clipboard text to a
//! topic; a persistent WebSocket subscription to the same topic writes text
//! published by other machines into the local clipboard.

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod hotkey;
pub mod sync;
pub mod transport;

pub use config::Config;

/// Result type alias for cloudclip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cloudclip operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(#[from] sync::PublishError),

    /// Hotkey error
    #[error("Hotkey error: {0}")]
    Hotkey(#[from] hotkey::HotkeyError),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
