//! BiDi Session - message router for WebDriver BiDi conformance testing.
//!
//! This library owns one duplex connection to a WebDriver BiDi server,
//! sends JSON commands, correlates responses by id and fans out events to
//! subscriptions and waiters.
//!
//! # Architecture
//!
//! The session follows a local end / remote end model:
//!
//! - **Local End (Rust)**: Sends commands, receives responses and events
//! - **Remote End (Server)**: Executes commands, emits events
//!
//! Key design principles:
//!
//! - Each [`Session`] owns: transport + dispatch loop + routing state
//! - Frames are processed in exact arrival order by a single task
//! - Commands may complete out of order; they are matched by id
//! - Every blocking wait takes a deadline
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bidi_session::{Result, Session, SessionOptions, SubscriptionRequest};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Endpoint from BIDI_WS_URL, or BIDI_HOST + PORT
//!     let session = Session::connect(SessionOptions::default()).await?;
//!
//!     let status = session.execute_command("session.status", json!({})).await?;
//!     println!("Ready: {}", status["ready"]);
//!
//!     session
//!         .subscribe(SubscriptionRequest::new(["log.entryAdded"]))
//!         .await?;
//!
//!     let events = session
//!         .drain_n_messages(1, Some(Duration::from_secs(5)))
//!         .await?;
//!     println!("Got {}", events[0].method);
//!
//!     session.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Command ids, subscription ids, channels |
//! | [`protocol`] | Wire message types and event name matching |
//! | [`session`] | [`Session`], subscriptions, waiters |
//! | [`transport`] | WebSocket and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing command ids, subscription ids and
/// channel names.
pub mod identifiers;

/// WebSocket protocol message types.
///
/// Outbound requests, inbound frame decoding and event patterns.
pub mod protocol;

/// Session message router.
///
/// Use [`Session::connect`] or [`Session::start`] to create a session.
pub mod session;

/// Transport layer.
///
/// Duplex frame channels consumed by the dispatch loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Channel, CommandId, SubscriptionId};

// Protocol types
pub use protocol::{Command, Event, EventPattern, Frame, ProtocolError};

// Session types
pub use session::{
    EventFilter, EventStream, EventWaiter, Session, SessionOptions, Subscription,
    SubscriptionRequest, Unsubscribe,
};

// Transport types
pub use transport::{ChannelTransport, RemoteEnd, Transport, WebSocketTransport};
