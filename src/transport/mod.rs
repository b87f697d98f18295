//! Transport layer.
//!
//! The router needs only a duplex message channel that is already
//! connected: a sink to send frames and a source to receive them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session        │                              │  BiDi server    │
//! │                 │        FrameSink             │                 │
//! │  Dispatch loop  │─────────────────────────────►│                 │
//! │  (owns both     │        FrameSource           │                 │
//! │   halves)       │◄─────────────────────────────│                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | In-memory transport with a scriptable remote end |
//! | `websocket` | WebSocket client transport |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-memory transport for tests and benchmarks.
pub mod channel;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelTransport, RemoteEnd};
pub use websocket::WebSocketTransport;

// ============================================================================
// Messages
// ============================================================================

/// A message received from the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame. Rejected by the decoder.
    Binary(Vec<u8>),
}

/// A message sent to the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl OutboundMessage {
    /// Returns the text payload, if any.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Sending half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one message.
    async fn send(&mut self, message: OutboundMessage) -> Result<()>;

    /// Closes the sending half.
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a transport.
///
/// `receive` is polled inside `tokio::select!` and must be cancel safe:
/// dropping the future before completion must not lose a message.
#[async_trait]
pub trait FrameSource: Send {
    /// Receives the next message, or `None` once the transport is closed.
    async fn receive(&mut self) -> Option<Result<InboundMessage>>;
}

/// Both halves of a connected transport.
pub struct TransportParts {
    /// Sending half.
    pub sink: Box<dyn FrameSink>,
    /// Receiving half.
    pub source: Box<dyn FrameSource>,
}

/// A connected duplex transport that can be split into halves.
pub trait Transport: Send {
    /// Splits the transport for the dispatch loop.
    fn into_parts(self) -> TransportParts;
}

impl Transport for TransportParts {
    fn into_parts(self) -> TransportParts {
        self
    }
}
