//! Error types for the session router.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bidi_session::{Error, Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     match session.execute_command("browsingContext.close", json!({})).await {
//!         Err(Error::Command { code, .. }) if code == "no such frame" => Ok(()),
//!         other => other.map(|_| ()),
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Command | [`Error::Command`] |
//! | Waiting | [`Error::Timeout`], [`Error::RequestTimeout`], [`Error::UnexpectedEvent`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CommandId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the endpoint or session options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the connection cannot be established or a frame
    /// cannot be written.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport closed.
    ///
    /// Terminal for the session: every outstanding command and blocking
    /// wait observes this once the dispatch loop exits.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or undecodable frame.
    ///
    /// Not attributable to a single command. Also produced from a
    /// server-sent top-level error frame that carries no command id.
    #[error("Protocol error ({code}): {message}")]
    Protocol {
        /// Protocol error code, e.g. `invalid argument`.
        code: String,
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument supplied by the caller.
    ///
    /// Returned by `unsubscribe` when a batch names something that is not
    /// subscribed, and by pattern parsing.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// Server-reported failure for one command.
    #[error("Command {id} failed ({code}): {message}")]
    Command {
        /// The command that failed.
        id: CommandId,
        /// Error code from the `error` field.
        code: String,
        /// Error message from the `message` field.
        message: String,
    },

    // ========================================================================
    // Waiting Errors
    // ========================================================================
    /// Operation timeout.
    ///
    /// Returned when an event wait exceeds its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Command response timeout.
    ///
    /// The command stays pending; a late response is absorbed.
    #[error("Command {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The command that timed out.
        id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// An event arrived inside a window that had to stay quiet.
    #[error("Unexpected event: {method}")]
    UnexpectedEvent {
        /// Method of the offending event.
        method: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a command error.
    #[inline]
    pub fn command(id: CommandId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            id,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(id: CommandId, timeout_ms: u64) -> Self {
        Self::RequestTimeout { id, timeout_ms }
    }

    /// Creates an unexpected event error.
    #[inline]
    pub fn unexpected_event(method: impl Into<String>) -> Self {
        Self::UnexpectedEvent {
            method: method.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a local deadline error.
    ///
    /// Never `true` for a server-side failure.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }

    /// Returns `true` if the server rejected a command.
    #[inline]
    #[must_use]
    pub fn is_command_error(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    /// Returns the server error code for command and protocol errors.
    #[inline]
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Command { code, .. } | Self::Protocol { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
