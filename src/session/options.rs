//! Session configuration.
//!
//! Timeouts, limits and the wire field naming used by a [`Session`].
//! The endpoint is read from the environment once, when connecting.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bidi_session::SessionOptions;
//!
//! let options = SessionOptions::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_channel_field("goog:channel");
//! ```
//!
//! # Environment
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BIDI_WS_URL` | unset | full endpoint URL, wins over the others |
//! | `BIDI_HOST` | `localhost` | server host |
//! | `PORT` | `8080` | server port |
//!
//! [`Session`]: super::Session

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable holding the full endpoint URL.
pub const ENDPOINT_ENV: &str = "BIDI_WS_URL";

/// Environment variable holding the server host.
pub const HOST_ENV: &str = "BIDI_HOST";

/// Environment variable holding the server port.
pub const PORT_ENV: &str = "PORT";

/// Host used when none is configured.
const DEFAULT_HOST: &str = "localhost";

/// Port used when none is configured.
const DEFAULT_PORT: u16 = 8080;

/// Default timeout for command execution.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for event waits.
const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for establishing the connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum in-flight commands before new ones are rejected.
const DEFAULT_MAX_PENDING: usize = 1000;

/// Channel field name used by the reference server.
pub const DEFAULT_CHANNEL_FIELD: &str = "goog:channel";

// ============================================================================
// SessionOptions
// ============================================================================

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Timeout used by [`super::Session::execute`].
    pub command_timeout: Duration,

    /// Timeout used by event waits that take no explicit deadline.
    pub event_timeout: Duration,

    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,

    /// Maximum number of unresolved commands.
    pub max_pending: usize,

    /// Name of the channel member in command and event frames.
    pub channel_field: String,

    /// Explicit endpoint; when `None` the environment is consulted.
    pub endpoint: Option<Url>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
            channel_field: DEFAULT_CHANNEL_FIELD.to_string(),
            endpoint: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Sets the command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the default event wait timeout.
    #[inline]
    #[must_use]
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the in-flight command limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Sets the channel field name.
    #[inline]
    #[must_use]
    pub fn with_channel_field(mut self, field: impl Into<String>) -> Self {
        self.channel_field = field.into();
        self
    }

    /// Sets an explicit endpoint.
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

// ============================================================================
// Endpoint Resolution
// ============================================================================

impl SessionOptions {
    /// Returns the endpoint, reading the environment if none was set.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if a URL cannot be parsed
    /// - [`Error::Config`] if `PORT` is not a valid port number
    pub fn resolve_endpoint(&self) -> Result<Url> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        endpoint_from_vars(
            env::var(ENDPOINT_ENV).ok(),
            env::var(HOST_ENV).ok(),
            env::var(PORT_ENV).ok(),
        )
    }
}

/// Builds the endpoint URL from raw variable values.
fn endpoint_from_vars(
    url: Option<String>,
    host: Option<String>,
    port: Option<String>,
) -> Result<Url> {
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        return Ok(Url::parse(&url)?);
    }

    let host = host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match port.filter(|p| !p.is_empty()) {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| Error::config(format!("Invalid {PORT_ENV} value: {port:?}")))?,
        None => DEFAULT_PORT,
    };

    Ok(Url::parse(&format!("ws://{host}:{port}"))?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.command_timeout, Duration::from_secs(30));
        assert_eq!(options.event_timeout, Duration::from_secs(5));
        assert_eq!(options.max_pending, 1000);
        assert_eq!(options.channel_field, "goog:channel");
        assert!(options.endpoint.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let options = SessionOptions::new()
            .with_command_timeout(Duration::from_millis(250))
            .with_event_timeout(Duration::from_millis(100))
            .with_max_pending(4)
            .with_channel_field("channel");

        assert_eq!(options.command_timeout, Duration::from_millis(250));
        assert_eq!(options.event_timeout, Duration::from_millis(100));
        assert_eq!(options.max_pending, 4);
        assert_eq!(options.channel_field, "channel");
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let url = Url::parse("ws://example.test:9222/session").expect("url");
        let options = SessionOptions::new().with_endpoint(url.clone());
        assert_eq!(options.resolve_endpoint().expect("endpoint"), url);
    }

    #[test]
    fn test_endpoint_defaults() {
        let url = endpoint_from_vars(None, None, None).expect("endpoint");
        assert_eq!(url.as_str(), "ws://localhost:8080/");
    }

    #[test]
    fn test_endpoint_host_and_port() {
        let url = endpoint_from_vars(None, Some("127.0.0.1".into()), Some("9222".into()))
            .expect("endpoint");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(9222));
    }

    #[test]
    fn test_endpoint_full_url_wins() {
        let url = endpoint_from_vars(
            Some("ws://other:1234/session".into()),
            Some("ignored".into()),
            Some("1".into()),
        )
        .expect("endpoint");
        assert_eq!(url.as_str(), "ws://other:1234/session");
    }

    #[test]
    fn test_endpoint_invalid_port() {
        let err = endpoint_from_vars(None, None, Some("eighty".into())).expect_err("bad port");
        assert!(matches!(err, Error::Config { .. }));
    }
}
