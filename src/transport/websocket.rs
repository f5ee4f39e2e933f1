//! WebSocket subscription to the relay
//!
//! Uses `tokio-tungstenite` for the duplex connection. TLS (`wss://`) is
//! negotiated by the connector when the endpoint asks for it.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::Config;
use crate::transport::{Connector, RelayEndpoint, Result, Session, TransportError};

/// Opens WebSocket subscriptions to a relay topic
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: RelayEndpoint,
    token: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoint: RelayEndpoint, token: Option<String>) -> Self {
        Self {
            endpoint,
            token: token.filter(|t| !t.is_empty()),
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RelayEndpoint::from_config(config),
            config.bearer_token().map(str::to_string),
        )
        .with_connect_timeout(config.request_timeout())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let url = self.endpoint.subscribe_url();
        debug!("Connecting to {}", url);

        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidEndpoint {
                    message: e.to_string(),
                })?;

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                TransportError::InvalidEndpoint {
                    message: format!("token is not a valid header value: {}", e),
                }
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout { url: url.clone() })?
            .map_err(|e| TransportError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;

        debug!("WebSocket handshake completed with status {}", response.status());

        Ok(Box::new(WsSession::new(stream)))
    }

    fn target(&self) -> String {
        self.endpoint.subscribe_url()
    }
}

/// A live WebSocket subscription
pub struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Relay ended the session (close frame or end of stream)
    peer_closed: bool,
    /// `close` already ran
    closed: bool,
}

impl WsSession {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            stream,
            peer_closed: false,
            closed: false,
        }
    }
}

#[async_trait]
impl Session for WsSession {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        if self.closed || self.peer_closed {
            return Ok(None);
        }

        while let Some(message) = self.stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(WsMessage::Binary(data)) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Ok(WsMessage::Close(frame)) => {
                    // tungstenite queues the close reply; `close` flushes it
                    debug!("Relay sent close frame: {:?}", frame);
                    self.peer_closed = true;
                    return Ok(None);
                }
                // Ping/Pong are answered by tungstenite
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    self.peer_closed = true;
                    return Ok(None);
                }
                Err(e) => {
                    return Err(TransportError::Read {
                        message: e.to_string(),
                    })
                }
            }
        }

        self.peer_closed = true;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // after a relay close only the pending close reply is left to send
        let result = if self.peer_closed {
            self.stream.flush().await
        } else {
            self.stream.close(None).await
        };

        match result {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Close {
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Relay that sends one frame, then closes the connection itself
    async fn closing_relay() -> (RelayEndpoint, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text(r#"{"title":"B","message":"hi"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            // drain until the client's close reply arrives
            while let Some(Ok(_)) = ws.next().await {}
        });

        (RelayEndpoint::new(&addr.to_string(), "t", false), handle)
    }

    #[tokio::test]
    async fn test_close_after_relay_close_is_ok() {
        let (endpoint, relay) = closing_relay().await;
        let connector = WsConnector::new(endpoint, None);

        let mut session = connector.connect().await.unwrap();
        assert_eq!(
            session.next_frame().await.unwrap().as_deref(),
            Some(r#"{"title":"B","message":"hi"}"#)
        );
        assert_eq!(session.next_frame().await.unwrap(), None);

        // the relay already closed; closing our side must not fail
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.next_frame().await.unwrap(), None);

        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WsConnector::new(RelayEndpoint::new("127.0.0.1:9", "t", false), None)
            .with_connect_timeout(Duration::from_secs(5));

        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Connect { .. }) | Err(TransportError::Timeout { .. })
        ));
    }
}
