//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing command ids, subscription ids and
//! channel names at compile time.
//!
//! | Type | Wraps | Source |
//! |------|-------|--------|
//! | [`CommandId`] | `u64` | per-session allocator |
//! | [`SubscriptionId`] | `String` | server `subscription` result or random UUID |
//! | [`Channel`] | `Option<String>` | normalized channel tag |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CommandId
// ============================================================================

/// Identifier correlating a command with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Identifier of an event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wraps a server-issued id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random v4 UUID id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Logical channel layered over the single connection.
///
/// Senders disagree on how the default channel is spelled: some omit the
/// field, some send an empty string. Both normalize to [`Channel::Default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The unnamed channel.
    #[default]
    Default,
    /// A named, non-empty channel.
    Named(String),
}

impl Channel {
    /// Normalizes an optional wire value.
    #[must_use]
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::Default,
            Some(name) => Self::Named(name.to_string()),
        }
    }

    /// Creates a named channel; an empty name is the default channel.
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Self::Default
        } else {
            Self::Named(name)
        }
    }

    /// Returns the value to put on the wire, `None` for the default channel.
    #[inline]
    #[must_use]
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }

    /// Returns `true` for the default channel.
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl From<&str> for Channel {
    fn from(value: &str) -> Self {
        Self::named(value)
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        Self::named(value)
    }
}

impl From<Option<&str>> for Channel {
    fn from(value: Option<&str>) -> Self {
        Self::from_wire(value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("<default>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
