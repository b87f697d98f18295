//! Outbound request frame.
//!
//! A [`Request`] is a [`Command`] with its allocated id, serialized with the
//! session's channel field name.

// ============================================================================
// Imports
// ============================================================================

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::identifiers::CommandId;

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// A command request from local end to remote end.
///
/// # Format
///
/// ```json
/// {
///   "id": 1,
///   "method": "module.methodName",
///   "params": { ... },
///   "goog:channel": "A"
/// }
/// ```
///
/// The channel entry is omitted on the default channel.
#[derive(Debug, Clone)]
pub struct Request {
    /// Identifier for request/response correlation.
    pub id: CommandId,

    /// Command with method, params and channel.
    pub command: Command,

    /// Name of the channel field on the wire.
    pub channel_field: String,
}

impl Request {
    /// Creates a new request.
    #[inline]
    #[must_use]
    pub fn new(id: CommandId, command: Command, channel_field: impl Into<String>) -> Self {
        Self {
            id,
            command,
            channel_field: channel_field.into(),
        }
    }

    /// Serializes the request to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let channel = self.command.channel.as_wire();
        let mut map = serializer.serialize_map(Some(3 + usize::from(channel.is_some())))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("method", &self.command.method)?;
        map.serialize_entry("params", &self.command.params)?;
        if let Some(channel) = channel {
            map.serialize_entry(&self.channel_field, channel)?;
        }
        map.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
