//! Outbound command definitions.
//!
//! Commands follow `module.methodName` format. The router carries any
//! method opaquely; only the `session` module commands it issues on its own
//! behalf are typed.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | any | [`Command`] with free-form params |
//! | `session` | [`SessionCommand`]: status, subscribe, unsubscribe |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::{Channel, SubscriptionId};

// ============================================================================
// Command
// ============================================================================

/// A protocol command before an id is assigned.
///
/// # Example
///
/// ```ignore
/// let command = Command::new("browsingContext.getTree", json!({}))
///     .with_channel("A");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Method in `module.methodName` format.
    pub method: String,

    /// Command parameters (a JSON object).
    pub params: Value,

    /// Channel the command is tagged with.
    pub channel: Channel,
}

impl Command {
    /// Creates a command on the default channel.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            channel: Channel::Default,
        }
    }

    /// Tags the command with a channel.
    #[inline]
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<Channel>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Returns the module part of the method.
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Session module commands used by the router itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum SessionCommand {
    /// Query server readiness.
    #[serde(rename = "session.status")]
    Status {},

    /// Subscribe to events.
    #[serde(rename = "session.subscribe")]
    Subscribe {
        /// Event names or module names.
        events: Vec<String>,
        /// Restrict to these browsing contexts.
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<String>>,
        /// Restrict to these user contexts.
        #[serde(rename = "userContexts", skip_serializing_if = "Option::is_none")]
        user_contexts: Option<Vec<String>>,
    },

    /// Unsubscribe by subscription id.
    #[serde(rename = "session.unsubscribe")]
    UnsubscribeById {
        /// Subscriptions to remove.
        subscriptions: Vec<SubscriptionId>,
    },

    /// Unsubscribe by event names and contexts.
    #[serde(rename = "session.unsubscribe")]
    UnsubscribeByAttributes {
        /// Event names or module names.
        events: Vec<String>,
        /// Contexts the names were subscribed for.
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<String>>,
    },
}

impl SessionCommand {
    /// Converts into a generic [`Command`] on the given channel.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn into_command(self, channel: Channel) -> Result<Command> {
        let mut value = serde_json::to_value(&self)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = value
            .get_mut("params")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok(Command {
            method,
            params,
            channel,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
