//! Persistent-socket transport used by the stream connections.
//!
//! - `Connector`: opens a socket to an endpoint URL
//! - `Socket`: one open text-frame socket
//! - `WsConnector` / `WsSocket`: WebSocket implementation (tokio-tungstenite)
//!
//! Tests swap in an in-memory connector; the connection state machine only
//! ever sees the traits.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    /// One unreadable frame. The socket itself is still usable.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("socket closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
            tungstenite::Error::Protocol(e) => TransportError::Protocol(e.to_string()),
            other => TransportError::Connection(other.to_string()),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// One open socket carrying text frames.
#[async_trait]
pub trait Socket: Send {
    /// Wait for the next text frame. `None` once the peer has closed.
    ///
    /// [`TransportError::InvalidFrame`] reports a single bad frame; any other
    /// error means the socket is gone.
    ///
    /// Must be cancel-safe: the connection driver polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the socket from our side.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

// ============================================================================
// WebSocket implementation
// ============================================================================

pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsConnector {
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        debug!("opening websocket {url}");
        let handshake = tokio_tungstenite::connect_async(url);
        let (stream, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        debug!("websocket {url} upgraded (status {})", response.status());
        Ok(Box::new(WsSocket { stream }))
    }
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            };
            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(|e| {
                        TransportError::InvalidFrame(format!("binary frame is not UTF-8: {e}"))
                    }))
                }
                Message::Close(frame) => {
                    debug!("peer closed websocket: {frame:?}");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("control frame");
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
