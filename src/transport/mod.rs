//! Relay transport: endpoint addressing, the subscribe session, and reconnect
//! policies
//!
//! The subscription is a long-lived WebSocket to `{url_base}/{topic}/ws`.
//! Connections are produced by a [`Connector`] so the subscription loop can be
//! driven by an in-memory connector in tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod protocol;
pub mod reconnect;
pub mod websocket;

pub use protocol::{decode_frame, DecodeError, InboundMessage, RelayFrame};
pub use reconnect::{BackoffPolicy, ConnectionState, ExponentialBackoff, FixedBackoff};
pub use websocket::{WsConnector, WsSession};

use crate::config::Config;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the subscription (network, TLS, or handshake)
    #[error("CC001: Could not connect to relay {url}: {message}")]
    Connect { url: String, message: String },

    /// The live subscription failed while reading
    #[error("CC002: Relay connection dropped: {message}")]
    Read { message: String },

    /// Closing the session failed
    #[error("CC003: Failed to close relay connection: {message}")]
    Close { message: String },

    /// Connection attempt exceeded its deadline
    #[error("CC004: Timed out connecting to relay {url}")]
    Timeout { url: String },

    /// Endpoint or header could not be built from the configuration
    #[error("CC005: Invalid relay endpoint: {message}")]
    InvalidEndpoint { message: String },
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Addresses of the relay topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    host: String,
    topic: String,
    tls: bool,
}

impl RelayEndpoint {
    pub fn new(host: impl Into<String>, topic: impl Into<String>, tls: bool) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            topic: topic.into().trim_matches('/').to_string(),
            tls,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.url_base, &config.url_topic, config.tls)
    }

    /// WebSocket URL of the topic's subscribe stream
    pub fn subscribe_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}/{}/ws", scheme, self.host, self.topic)
    }

    /// HTTP URL that accepts publishes to the topic
    pub fn publish_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}/{}", scheme, self.host, self.topic)
    }
}

/// A live subscription to the relay
#[async_trait]
pub trait Session: Send {
    /// Wait for the next text frame
    ///
    /// Returns `Ok(None)` once the relay has closed the connection.
    async fn next_frame(&mut self) -> Result<Option<String>>;

    /// Close the session
    async fn close(&mut self) -> Result<()>;
}

/// Opens subscription sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// Human readable target, used in logs
    fn target(&self) -> String;
}
