//! WebSocket protocol message types.
//!
//! This module defines the message format for communication between
//! the local end (this crate) and the remote end (the BiDi server).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Remote | Command with allocated id |
//! | `Frame::CommandResponse` | Remote → Local | Command result |
//! | `Frame::CommandError` | Remote → Local | Command failure |
//! | `Frame::Event` | Remote → Local | Unsolicited notification |
//! | `Frame::ProtocolError` | Remote → Local | Failure with no command id |
//!
//! # Command Naming
//!
//! Commands and events follow `module.methodName` format:
//!
//! - `session.subscribe`
//! - `browsingContext.getTree`
//! - `log.entryAdded`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Generic and session commands |
//! | `event` | Event type and name matcher |
//! | `frame` | Inbound frame decoder |
//! | `request` | Outbound request frame |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command definitions.
pub mod command;

/// Event message type and hierarchical name matching.
pub mod event;

/// Inbound frame decoding.
pub mod frame;

/// Outbound request frame.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, SessionCommand};
pub use event::{Event, EventPattern, name_matches};
pub use frame::{Frame, INVALID_ARGUMENT, ProtocolError, UNKNOWN_ERROR};
pub use request::Request;
