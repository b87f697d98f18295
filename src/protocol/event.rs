//! Event message types and the hierarchical event-name matcher.
//!
//! Events are notifications sent from the remote end without an id.
//!
//! # Event Names
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `log.entryAdded` | exactly `log.entryAdded` |
//! | `browsingContext` | every `browsingContext.*` event |
//! | `network` | `network.beforeRequestSent`, `network.responseCompleted`, ... |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::Channel;

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "module.eventName",
///   "params": { "context": "...", ... },
///   "goog:channel": "A"
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,

    /// Raw channel tag, if the frame carried one.
    pub channel: Option<String>,

    /// Browsing context taken from `params.context` or `params.source.context`.
    pub context: Option<String>,
}

impl Event {
    /// Creates an event, reading the context from `params.context` or,
    /// for `log` and `script` events, `params.source.context`.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, channel: Option<String>) -> Self {
        let context = params
            .get("context")
            .or_else(|| params.get("source").and_then(|source| source.get("context")))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            method: method.into(),
            params,
            channel,
            context,
        }
    }

    /// Returns the normalized channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> Channel {
        Channel::from_wire(self.channel.as_deref())
    }

    /// Returns the user context from `params.userContext`, if any.
    #[inline]
    #[must_use]
    pub fn user_context(&self) -> Option<&str> {
        self.params.get("userContext").and_then(Value::as_str)
    }

    /// Returns the module name from the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = Event::new("browsingContext.load", json!({}), None);
    /// assert_eq!(event.module(), "browsingContext");
    /// ```
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Gets a string from params.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets a u64 from params.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.params
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default()
    }
}

// ============================================================================
// EventPattern
// ============================================================================

/// An event name or module prefix used to select events.
///
/// A pattern matches a method when they are equal, or when the pattern
/// is a prefix of the method ending on a `.` boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventPattern(String);

impl EventPattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for empty names and names with an
    /// empty segment (`"log."`, `".load"`, `"a..b"`).
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Err(Error::invalid_argument(format!(
                "Invalid event name: {name:?}"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Parses a list of patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the list is empty or any name
    /// fails to parse.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = names
            .into_iter()
            .map(|name| Self::parse(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(Error::invalid_argument("Event list is empty"));
        }
        Ok(patterns)
    }

    /// Returns the pattern text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this pattern names a whole module.
    #[inline]
    #[must_use]
    pub fn is_module(&self) -> bool {
        !self.0.contains('.')
    }

    /// Returns `true` if `method` is selected by this pattern.
    #[inline]
    #[must_use]
    pub fn matches(&self, method: &str) -> bool {
        name_matches(&self.0, method)
    }
}

/// Returns `true` if `pattern` equals `method` or is a prefix of it ending
/// on a `.` boundary.
#[must_use]
pub fn name_matches(pattern: &str, method: &str) -> bool {
    match method.strip_prefix(pattern) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

impl FromStr for EventPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
