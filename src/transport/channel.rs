//! In-memory transport.
//!
//! [`ChannelTransport::pair`] returns the session side and a [`RemoteEnd`]
//! that plays the server: it reads the requests the session sent and
//! pushes responses, events and malformed frames back.
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut remote) = ChannelTransport::pair();
//! let session = Session::start(transport, SessionOptions::default());
//!
//! let id = session.send_command(Command::new("session.status", json!({})))?;
//! let request = remote.next_request().await.expect("request");
//! remote.respond(request["id"].as_u64().unwrap(), json!({ "ready": true }));
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{FrameSink, FrameSource, InboundMessage, OutboundMessage, Transport, TransportParts};

// ============================================================================
// Constants
// ============================================================================

/// Channel field the remote end tags events with.
const DEFAULT_CHANNEL_FIELD: &str = "goog:channel";

// ============================================================================
// ChannelTransport
// ============================================================================

/// Session side of an in-memory transport.
pub struct ChannelTransport {
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl ChannelTransport {
    /// Creates a connected transport and its remote end.
    #[must_use]
    pub fn pair() -> (Self, RemoteEnd) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound_tx,
                inbound_rx,
            },
            RemoteEnd {
                inbound_tx: Some(inbound_tx),
                outbound_rx,
                channel_field: DEFAULT_CHANNEL_FIELD.to_string(),
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn into_parts(self) -> TransportParts {
        TransportParts {
            sink: Box::new(ChannelSink {
                outbound_tx: Some(self.outbound_tx),
            }),
            source: Box::new(ChannelSource {
                inbound_rx: self.inbound_rx,
            }),
        }
    }
}

struct ChannelSink {
    outbound_tx: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(message)
            .map_err(|_| Error::connection("remote end dropped"))
    }

    async fn close(&mut self) -> Result<()> {
        self.outbound_tx = None;
        Ok(())
    }
}

struct ChannelSource {
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn receive(&mut self) -> Option<Result<InboundMessage>> {
        self.inbound_rx.recv().await.map(Ok)
    }
}

// ============================================================================
// RemoteEnd
// ============================================================================

/// Server side of an in-memory transport.
///
/// Pushing after [`RemoteEnd::close`] is a no-op.
pub struct RemoteEnd {
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    channel_field: String,
}

impl RemoteEnd {
    /// Changes the field name used to tag events with a channel.
    #[must_use]
    pub fn with_channel_field(mut self, field: impl Into<String>) -> Self {
        self.channel_field = field.into();
        self
    }

    /// Receives the next raw message the session sent.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound_rx.recv().await
    }

    /// Receives the next text message the session sent, parsed as JSON.
    ///
    /// Binary messages and unparsable text are skipped.
    pub async fn next_request(&mut self) -> Option<Value> {
        while let Some(message) = self.outbound_rx.recv().await {
            if let Some(value) = message
                .as_text()
                .and_then(|text| serde_json::from_str(text).ok())
            {
                return Some(value);
            }
        }
        None
    }

    /// Pushes a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(InboundMessage::Text(text.into()));
        }
    }

    /// Pushes a binary frame.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(InboundMessage::Binary(bytes.into()));
        }
    }

    /// Pushes a JSON frame.
    pub fn send_json(&self, value: &Value) {
        self.send_text(value.to_string());
    }

    /// Pushes a success response.
    pub fn respond(&self, id: u64, result: Value) {
        self.send_json(&json!({ "id": id, "type": "success", "result": result }));
    }

    /// Pushes an error response.
    pub fn respond_error(&self, id: u64, code: &str, message: &str) {
        self.send_json(&json!({
            "id": id,
            "type": "error",
            "error": code,
            "message": message,
        }));
    }

    /// Pushes an event, tagged with `channel` when given.
    pub fn emit(&self, method: &str, params: Value, channel: Option<&str>) {
        let mut frame = json!({ "type": "event", "method": method, "params": params });
        if let (Some(channel), Some(object)) = (channel, frame.as_object_mut()) {
            object.insert(self.channel_field.clone(), Value::from(channel));
        }
        self.send_json(&frame);
    }

    /// Closes the inbound direction; the session observes end of stream.
    pub fn close(&mut self) {
        self.inbound_tx = None;
    }

    /// Returns `true` once the session closed its sending half.
    #[must_use]
    pub fn is_session_closed(&self) -> bool {
        self.outbound_rx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_sees_session_messages() {
        let (transport, mut remote) = ChannelTransport::pair();
        let TransportParts { mut sink, .. } = transport.into_parts();

        sink.send(OutboundMessage::Binary(vec![1, 2]))
            .await
            .expect("send");
        sink.send(OutboundMessage::Text(r#"{"id":1}"#.to_string()))
            .await
            .expect("send");

        // Binary is skipped by next_request
        let request = remote.next_request().await.expect("request");
        assert_eq!(request["id"], 1);
    }

    #[tokio::test]
    async fn test_emit_with_channel() {
        let (transport, remote) = ChannelTransport::pair();
        let TransportParts { mut source, .. } = transport.into_parts();

        remote.emit("log.entryAdded", json!({}), Some("A"));
        let message = source.receive().await.expect("message").expect("ok");
        let InboundMessage::Text(text) = message else {
            panic!("expected text");
        };
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["goog:channel"], "A");
        assert_eq!(value["type"], "event");
    }

    #[tokio::test]
    async fn test_close_ends_source() {
        let (transport, mut remote) = ChannelTransport::pair();
        let TransportParts { mut source, .. } = transport.into_parts();

        remote.respond(1, json!({}));
        remote.close();
        remote.respond(2, json!({}));

        assert!(source.receive().await.is_some());
        assert!(source.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_close_is_observed() {
        let (transport, remote) = ChannelTransport::pair();
        let TransportParts { mut sink, source } = transport.into_parts();
        drop(source);

        sink.close().await.expect("close");
        assert!(remote.is_session_closed());
        assert!(matches!(
            sink.send(OutboundMessage::Text(String::new())).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
