//! WebSocket client transport.
//!
//! Connects to the BiDi server endpoint and splits the stream into
//! [`FrameSink`] and [`FrameSource`] halves.
//!
//! Ping and pong frames are handled by tungstenite and never surface;
//! a close frame ends the source.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};

use super::{FrameSink, FrameSource, InboundMessage, OutboundMessage, Transport, TransportParts};

// ============================================================================
// Types
// ============================================================================

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// A connected WebSocket client.
///
/// # Example
///
/// ```ignore
/// let url = Url::parse("ws://localhost:8080/session")?;
/// let transport = WebSocketTransport::connect(&url, Duration::from_secs(10)).await?;
/// let session = Session::start(transport, SessionOptions::default());
/// ```
pub struct WebSocketTransport {
    stream: Stream,
}

impl WebSocketTransport {
    /// Connects to `url`, failing after `connect_timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    /// - [`Error::Connection`] if the connection times out
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(url: &Url, connect_timeout: Duration) -> Result<Self> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Unsupported endpoint scheme: {}",
                url.scheme()
            )));
        }

        debug!(%url, "Connecting WebSocket");

        let (stream, response) = timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| {
            Error::connection(format!(
                "Timed out after {}ms connecting to {url}",
                connect_timeout.as_millis()
            ))
        })??;

        info!(%url, status = %response.status(), "WebSocket connection established");

        Ok(Self { stream })
    }
}

impl Transport for WebSocketTransport {
    fn into_parts(self) -> TransportParts {
        let (sink, source) = self.stream.split();
        TransportParts {
            sink: Box::new(WebSocketSink { sink }),
            source: Box::new(WebSocketSource { source }),
        }
    }
}

// ============================================================================
// Halves
// ============================================================================

struct WebSocketSink {
    sink: SplitSink<Stream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        let message = match message {
            OutboundMessage::Text(text) => Message::Text(text.into()),
            OutboundMessage::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WebSocketSource {
    source: SplitStream<Stream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn receive(&mut self) -> Option<Result<InboundMessage>> {
        loop {
            match self.source.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(InboundMessage::Text(text.to_string()))),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(InboundMessage::Binary(bytes.to_vec())));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return None;
                }
                // Ping, Pong, raw frames
                Ok(other) => trace!(kind = ?other, "Ignoring control frame"),
                Err(e) => return Some(Err(Error::WebSocket(e))),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
