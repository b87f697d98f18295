//! Inbound frame decoding.
//!
//! Every inbound frame is classified into exactly one [`Frame`] variant.
//! Decoding never fails: input that cannot be attributed to a command or
//! read as an event becomes [`Frame::ProtocolError`].
//!
//! | Wire shape | Variant |
//! |------------|---------|
//! | `{"id": n, "type": "success", "result": {..}}` | [`Frame::CommandResponse`] |
//! | `{"id": n, "type": "error", "error": c, "message": m}` | [`Frame::CommandError`] |
//! | `{"type": "event", "method": s, "params": {..}}` | [`Frame::Event`] |
//! | `{"error": c, "message": m}` (no or null id) | [`Frame::ProtocolError`] |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::identifiers::CommandId;

use super::Event;

// ============================================================================
// Constants
// ============================================================================

/// Error code used for undecodable input.
pub const INVALID_ARGUMENT: &str = "invalid argument";

/// Error code used when the server omits one.
pub const UNKNOWN_ERROR: &str = "unknown error";

// ============================================================================
// Frame
// ============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Successful command response.
    CommandResponse {
        /// Matches the command `id`.
        id: CommandId,
        /// Result data.
        result: Value,
    },

    /// Server-reported command failure.
    CommandError {
        /// Matches the command `id`.
        id: CommandId,
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Unsolicited event.
    Event(Event),

    /// Error not tied to any command.
    ProtocolError(ProtocolError),
}

// ============================================================================
// ProtocolError
// ============================================================================

/// A failure that cannot be attributed to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

impl ProtocolError {
    /// Creates a protocol error.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ProtocolError> for crate::error::Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol {
            code: err.code,
            message: err.message,
        }
    }
}

impl Frame {
    /// Returns the command id if this frame answers a command.
    #[inline]
    #[must_use]
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            Self::CommandResponse { id, .. } | Self::CommandError { id, .. } => Some(*id),
            Self::Event(_) | Self::ProtocolError(_) => None,
        }
    }

    /// Creates a protocol error frame.
    #[inline]
    #[must_use]
    pub fn protocol_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolError(ProtocolError::new(code, message))
    }

    /// Frame produced for a binary message, which the protocol does not carry.
    #[inline]
    #[must_use]
    pub fn binary_rejected(len: usize) -> Self {
        Self::protocol_error(
            INVALID_ARGUMENT,
            format!("Binary frames are not supported ({len} bytes)"),
        )
    }

    /// Decodes a text frame.
    ///
    /// `channel_field` names the member carrying the channel tag.
    #[must_use]
    pub fn decode(text: &str, channel_field: &str) -> Self {
        match serde_json::from_str::<RawFrame>(text) {
            Ok(raw) => raw.classify(channel_field),
            Err(e) => Self::protocol_error(INVALID_ARGUMENT, format!("Cannot parse frame: {e}")),
        }
    }
}

// ============================================================================
// RawFrame
// ============================================================================

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FrameType {
    Success,
    Error,
    Event,
    #[serde(other)]
    Unknown,
}

/// Loosely typed view of any JSON object frame.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,

    #[serde(rename = "type", default)]
    frame_type: Option<FrameType>,

    #[serde(default)]
    method: Option<String>,

    #[serde(default)]
    params: Option<Value>,

    #[serde(default)]
    result: Option<Value>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    message: Option<String>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawFrame {
    fn classify(mut self, channel_field: &str) -> Frame {
        let id = self.id.as_ref().and_then(Value::as_u64).map(CommandId::new);
        let has_id = self.id.as_ref().is_some_and(|v| !v.is_null());

        match (self.frame_type, id) {
            (Some(FrameType::Success), Some(id)) => Frame::CommandResponse {
                id,
                result: self.result.unwrap_or_else(|| Value::Object(Map::new())),
            },
            (Some(FrameType::Error), Some(id)) => Frame::CommandError {
                id,
                code: self.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
                message: self.message.unwrap_or_default(),
            },
            (Some(FrameType::Event), None) if !has_id => self.into_event(channel_field),
            (Some(FrameType::Error), None) => self.into_protocol_error(),
            (None, Some(id)) if self.result.is_some() => Frame::CommandResponse {
                id,
                result: self.result.take().unwrap_or_default(),
            },
            (None, Some(id)) if self.error.is_some() => Frame::CommandError {
                id,
                code: self.error.unwrap_or_default(),
                message: self.message.unwrap_or_default(),
            },
            (None, None) if self.error.is_some() && !has_id => self.into_protocol_error(),
            (None, None) if self.method.is_some() && !has_id => self.into_event(channel_field),
            _ => Frame::protocol_error(INVALID_ARGUMENT, "Unrecognized frame shape"),
        }
    }

    fn into_event(mut self, channel_field: &str) -> Frame {
        let Some(method) = self.method.take() else {
            return Frame::protocol_error(INVALID_ARGUMENT, "Event frame without method");
        };
        let channel = self
            .extra
            .remove(channel_field)
            .and_then(|v| v.as_str().map(str::to_string));
        let params = self.params.unwrap_or_else(|| Value::Object(Map::new()));
        Frame::Event(Event::new(method, params, channel))
    }

    fn into_protocol_error(self) -> Frame {
        Frame::protocol_error(
            self.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            self.message.unwrap_or_default(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const FIELD: &str = "goog:channel";

    #[test]
    fn test_success_response() {
        let frame = Frame::decode(
            r#"{"id": 1, "type": "success", "result": {"ready": true}}"#,
            FIELD,
        );
        assert_eq!(
            frame,
            Frame::CommandResponse {
                id: CommandId::new(1),
                result: json!({ "ready": true }),
            }
        );
        assert_eq!(frame.command_id(), Some(CommandId::new(1)));
    }

    #[test]
    fn test_error_response() {
        let frame = Frame::decode(
            r#"{"id": 4, "type": "error", "error": "no such frame", "message": "gone"}"#,
            FIELD,
        );
        assert_eq!(
            frame,
            Frame::CommandError {
                id: CommandId::new(4),
                code: "no such frame".to_string(),
                message: "gone".to_string(),
            }
        );
    }

    #[test]
    fn test_event_with_channel() {
        let frame = Frame::decode(
            r#"{"type": "event", "method": "log.entryAdded",
                "params": {"context": "ctx"}, "goog:channel": "A"}"#,
            FIELD,
        );
        let Frame::Event(event) = frame else {
            panic!("expected event");
        };
        assert_eq!(event.method, "log.entryAdded");
        assert_eq!(event.channel.as_deref(), Some("A"));
        assert_eq!(event.context.as_deref(), Some("ctx"));
        assert_eq!(event.params, json!({ "context": "ctx" }));
    }

    #[test]
    fn test_event_ignores_other_channel_field() {
        let frame = Frame::decode(
            r#"{"type": "event", "method": "log.entryAdded", "params": {}, "channel": "A"}"#,
            FIELD,
        );
        let Frame::Event(event) = frame else {
            panic!("expected event");
        };
        assert_eq!(event.channel, None);
    }

    #[test]
    fn test_top_level_error_without_id() {
        let frame = Frame::decode(
            r#"{"error": "invalid argument", "message": "Cannot parse data as JSON"}"#,
            FIELD,
        );
        assert_eq!(
            frame,
            Frame::protocol_error("invalid argument", "Cannot parse data as JSON")
        );
        assert_eq!(frame.command_id(), None);
    }

    #[test]
    fn test_error_with_null_id_is_protocol_error() {
        let frame = Frame::decode(
            r#"{"id": null, "type": "error", "error": "invalid argument", "message": "bad"}"#,
            FIELD,
        );
        assert!(matches!(frame, Frame::ProtocolError(ref err) if err.code == "invalid argument"));
    }

    #[test]
    fn test_untyped_response() {
        let frame = Frame::decode(r#"{"id": 3, "result": {}}"#, FIELD);
        assert_eq!(frame.command_id(), Some(CommandId::new(3)));
    }

    #[test]
    fn test_malformed_frames() {
        for text in [
            "not json",
            "[1, 2, 3]",
            r#"{"id": "abc", "type": "success", "result": {}}"#,
            r#"{"type": "event", "params": {}}"#,
            r#"{"foo": "bar"}"#,
        ] {
            let frame = Frame::decode(text, FIELD);
            assert!(
                matches!(frame, Frame::ProtocolError(ref err) if err.code == INVALID_ARGUMENT),
                "{text} -> {frame:?}"
            );
        }
    }

    #[test]
    fn test_binary_rejected() {
        let frame = Frame::binary_rejected(4);
        assert!(matches!(frame, Frame::ProtocolError(ref err) if err.code == INVALID_ARGUMENT));
    }
}
