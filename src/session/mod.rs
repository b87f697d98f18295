//! Session message router.
//!
//! A [`Session`] owns one transport. It sends commands and correlates their
//! responses by id, and it delivers events to subscriptions and waiters.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bidi_session::{EventFilter, Session, SessionOptions, SubscriptionRequest};
//!
//! let session = Session::connect(SessionOptions::default()).await?;
//!
//! session.execute_command("session.status", serde_json::json!({})).await?;
//! session.subscribe(SubscriptionRequest::new(["log.entryAdded"])).await?;
//!
//! let waiter = session.expect_event("log.entryAdded")?;
//! // ...trigger the event...
//! let event = waiter.wait(Duration::from_secs(5)).await?;
//! ```
//!
//! # Operations
//!
//! | Operation | Blocks | Notes |
//! |-----------|--------|-------|
//! | `send_command` | no | returns the allocated id |
//! | `await_result` | yes | timeout leaves the command pending |
//! | `execute_command` | yes | `send_command` + `await_result` |
//! | `subscribe` / `unsubscribe` | yes | local registry + `session.*` command |
//! | `wait_for_event` | yes | one-shot waiter, removed on timeout |
//! | `drain_n_messages` | yes | takes from the subscribed event inbox |
//! | `assert_no_events_in_queue` | yes | never consumes anything |

// ============================================================================
// Submodules
// ============================================================================

/// Command id allocation and response correlation.
mod correlator;

/// Dispatch loop and frame routing.
mod dispatch;

/// Session configuration.
pub mod options;

/// Subscription registry.
pub mod registry;

/// Waiters and buffered queues.
pub mod waiter;

#[cfg(test)]
mod tests;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Channel, CommandId, SubscriptionId};
use crate::protocol::{Command, Event, ProtocolError, Request, SessionCommand};
use crate::transport::{OutboundMessage, Transport, WebSocketTransport};

use dispatch::{LoopCommand, Router};

// ============================================================================
// Re-exports
// ============================================================================

pub use options::SessionOptions;
pub use registry::{Subscription, SubscriptionRequest, Unsubscribe};
pub use waiter::{BufferedQueue, EventFilter, EventStream, EventWaiter};

// ============================================================================
// Session
// ============================================================================

/// Handle to one protocol session.
///
/// Cheap to clone; every clone drives the same connection. The dispatch
/// loop stops once [`Session::close`] is called, the transport ends, or
/// the last clone is dropped.
pub struct Session {
    /// Shared routing state.
    router: Arc<Router>,
    /// Channel to the dispatch loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Configuration.
    options: Arc<SessionOptions>,
    /// Dispatch loop task, taken by `close`.
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
            command_tx: self.command_tx.clone(),
            options: Arc::clone(&self.options),
            task: Arc::clone(&self.task),
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Starts a session over an already connected transport.
    ///
    /// Spawns the dispatch loop; must be called inside a tokio runtime.
    #[must_use]
    pub fn start(transport: impl Transport, options: SessionOptions) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Router::new(options.max_pending));

        let task = tokio::spawn(dispatch::run(
            transport.into_parts(),
            command_rx,
            Arc::clone(&router),
            options.channel_field.clone(),
        ));

        debug!(channel_field = %options.channel_field, "Session started");

        Self {
            router,
            command_tx,
            options: Arc::new(options),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Connects a WebSocket transport and starts a session.
    ///
    /// The endpoint is `options.endpoint` or, if unset, read from the
    /// environment.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] or [`Error::Url`] if the endpoint is invalid
    /// - [`Error::Connection`] or [`Error::WebSocket`] if connecting fails
    pub async fn connect(options: SessionOptions) -> Result<Self> {
        let url = options.resolve_endpoint()?;
        let transport = WebSocketTransport::connect(&url, options.connect_timeout).await?;
        info!(%url, "Session connected");
        Ok(Self::start(transport, options))
    }

    /// Connects with default options and the endpoint from the environment.
    ///
    /// # Errors
    ///
    /// See [`Session::connect`].
    pub async fn connect_from_env() -> Result<Self> {
        Self::connect(SessionOptions::default()).await
    }

    /// Closes the transport and waits for the dispatch loop to finish.
    ///
    /// Pending commands and blocked waits fail with
    /// [`Error::ConnectionClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the dispatch loop panicked.
    pub async fn close(&self) -> Result<()> {
        let _ = self.command_tx.send(LoopCommand::Shutdown);

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::connection(format!("Dispatch loop failed: {e}")))?;
        }
        Ok(())
    }

    /// Returns `true` once the dispatch loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.router.correlator.is_closed()
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}

// ============================================================================
// Session - Commands
// ============================================================================

impl Session {
    /// Sends a command without waiting for its response.
    ///
    /// The command is registered before its frame is queued, so a response
    /// can never arrive unmatched. Call [`Session::await_result`] or
    /// [`Session::discard`] for the returned id; unclaimed outcomes are
    /// kept only up to `max_pending` and then evicted oldest first.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the session is closed
    /// - [`Error::Protocol`] if too many commands are pending
    /// - [`Error::Json`] if the command cannot be serialized
    pub fn send_command(&self, command: Command) -> Result<CommandId> {
        let id = self.router.correlator.issue()?;
        let method = command.method.clone();

        let text = match Request::new(id, command, self.options.channel_field.as_str()).to_text()
        {
            Ok(text) => text,
            Err(e) => {
                self.router.correlator.cancel(id);
                return Err(e);
            }
        };

        if self
            .command_tx
            .send(LoopCommand::Send {
                id: Some(id),
                message: OutboundMessage::Text(text),
            })
            .is_err()
        {
            self.router.correlator.cancel(id);
            return Err(Error::ConnectionClosed);
        }

        trace!(%id, %method, "Command queued");
        Ok(id)
    }

    /// Waits for the outcome of a sent command.
    ///
    /// `None` waits without a deadline. On timeout the command stays
    /// pending and may be awaited again.
    ///
    /// # Errors
    ///
    /// - [`Error::Command`] if the server answered with an error
    /// - [`Error::RequestTimeout`] if the deadline elapsed
    /// - [`Error::ConnectionClosed`] if the transport closed first
    /// - [`Error::InvalidArgument`] if `id` is unknown or already consumed
    pub async fn await_result(&self, id: CommandId, timeout: Option<Duration>) -> Result<Value> {
        self.router.correlator.wait(id, timeout).await
    }

    /// Sends a command and waits up to the configured command timeout.
    ///
    /// # Errors
    ///
    /// See [`Session::send_command`] and [`Session::await_result`].
    pub async fn execute(&self, command: Command) -> Result<Value> {
        let id = self.send_command(command)?;
        self.await_result(id, Some(self.options.command_timeout))
            .await
    }

    /// Sends `method` with `params` on the default channel and waits.
    ///
    /// # Errors
    ///
    /// See [`Session::execute`].
    pub async fn execute_command(&self, method: &str, params: Value) -> Result<Value> {
        self.execute(Command::new(method, params)).await
    }

    /// Stops tracking the result of `id`. A later response is absorbed.
    pub fn discard(&self, id: CommandId) {
        self.router.correlator.discard(id);
    }

    /// Returns the number of commands awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.router.correlator.pending_count()
    }
}

// ============================================================================
// Session - Subscriptions
// ============================================================================

impl Session {
    /// Subscribes locally and on the server.
    ///
    /// The local entry is registered before `session.subscribe` is sent,
    /// so events that follow the response are never missed. If the server
    /// returns a subscription id, that id is used.
    ///
    /// On [`Error::RequestTimeout`] the command is still pending, so the
    /// local entry stays and is settled by the late response: renamed on
    /// success, removed on error.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the request is malformed
    /// - Any error of [`Session::execute`]; apart from a timeout, the local
    ///   entry is rolled back
    pub async fn subscribe(&self, request: SubscriptionRequest) -> Result<SubscriptionId> {
        let command = SessionCommand::Subscribe {
            events: request.events.clone(),
            contexts: request.contexts.clone(),
            user_contexts: request.user_contexts.clone(),
        }
        .into_command(request.channel.clone())?;

        let local = self.register_subscription(&request)?;

        let id = match self.send_command(command) {
            Ok(id) => id,
            Err(e) => {
                roll_back_subscription(&self.router, local);
                return Err(e);
            }
        };

        match self.await_result(id, Some(self.options.command_timeout)).await {
            Ok(result) => Ok(adopt_subscription_id(&self.router, local, &result)),
            Err(e) if e.is_timeout() => {
                debug!(%local, %id, "Subscribe timed out, settling on late response");
                let router = Arc::clone(&self.router);
                tokio::spawn(async move {
                    match router.correlator.wait(id, None).await {
                        Ok(result) => {
                            adopt_subscription_id(&router, local, &result);
                        }
                        Err(_) => roll_back_subscription(&router, local),
                    }
                });
                Err(e)
            }
            Err(e) => {
                roll_back_subscription(&self.router, local);
                Err(e)
            }
        }
    }

    /// Registers a subscription locally without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the request is malformed.
    pub fn register_subscription(&self, request: &SubscriptionRequest) -> Result<SubscriptionId> {
        self.router
            .registry
            .lock()
            .subscribe(request, SubscriptionId::generate())
    }

    /// Unsubscribes on the server and locally, all or nothing.
    ///
    /// The target is validated locally first; nothing is sent if any part
    /// of it has no active subscription.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if any id or name/context pair is not
    ///   subscribed
    /// - Any error of [`Session::execute`]; local state is unchanged
    pub async fn unsubscribe(&self, target: Unsubscribe) -> Result<()> {
        self.router.registry.lock().check_unsubscribe(&target)?;

        let command = match &target {
            Unsubscribe::Ids(ids) => SessionCommand::UnsubscribeById {
                subscriptions: ids.clone(),
            }
            .into_command(Channel::Default)?,
            Unsubscribe::Attributes {
                events,
                contexts,
                channel,
            } => SessionCommand::UnsubscribeByAttributes {
                events: events.clone(),
                contexts: contexts.clone(),
            }
            .into_command(channel.clone())?,
        };

        self.execute(command).await?;

        if let Err(e) = self.router.registry.lock().unsubscribe(&target) {
            warn!(error = %e, "Subscriptions changed while unsubscribing");
        }
        Ok(())
    }

    /// Unsubscribes locally without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any part of `target` is not
    /// subscribed; nothing is removed in that case.
    pub fn unregister_subscription(&self, target: &Unsubscribe) -> Result<()> {
        self.router.registry.lock().unsubscribe(target)
    }

    /// Returns the active subscriptions in registration order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.router.registry.lock().subscriptions()
    }
}

/// Replaces `local` with the server's `result.subscription`, if any.
fn adopt_subscription_id(
    router: &Router,
    local: SubscriptionId,
    result: &Value,
) -> SubscriptionId {
    match result.get("subscription").and_then(Value::as_str) {
        Some(remote) => {
            let remote = SubscriptionId::new(remote);
            router.registry.lock().rename(&local, remote.clone());
            debug!(%remote, "Subscribed");
            remote
        }
        None => {
            debug!(%local, "Subscribed");
            local
        }
    }
}

/// Removes the entry registered under `local`.
fn roll_back_subscription(router: &Router, local: SubscriptionId) {
    let rollback = Unsubscribe::Ids(vec![local]);
    if let Err(e) = router.registry.lock().unsubscribe(&rollback) {
        warn!(error = %e, "Subscription rollback failed");
    }
}

// ============================================================================
// Session - Events
// ============================================================================

impl Session {
    /// Registers a one-shot waiter before the event is triggered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session is closed.
    pub fn expect_event(&self, filter: impl Into<EventFilter>) -> Result<EventWaiter> {
        let filter = filter.into();
        let (tx, rx) = oneshot::channel();
        let id = self
            .router
            .registry
            .lock()
            .add_waiter(filter.clone(), waiter::Waiter::OneShot(Some(tx)))?;
        Ok(EventWaiter::new(id, rx, &filter, Arc::clone(&self.router)))
    }

    /// Waits for the next event matching `filter`.
    ///
    /// `None` uses the configured event timeout. The waiter is removed on
    /// timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing matched in time
    /// - [`Error::ConnectionClosed`] if the transport closed first
    pub async fn wait_for_event(
        &self,
        filter: impl Into<EventFilter>,
        timeout: Option<Duration>,
    ) -> Result<Event> {
        let deadline = self.event_deadline(timeout);
        self.expect_event(filter)?.wait(deadline).await
    }

    /// Registers a buffered waiter with its own queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session is closed.
    pub fn listen(&self, filter: impl Into<EventFilter>) -> Result<EventStream> {
        let filter = filter.into();
        let queue = Arc::new(BufferedQueue::new());
        let id = self
            .router
            .registry
            .lock()
            .add_waiter(filter.clone(), waiter::Waiter::Buffered(Arc::clone(&queue)))?;
        Ok(EventStream::new(id, queue, &filter, Arc::clone(&self.router)))
    }

    /// Takes the next `n` subscribed events in arrival order.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if fewer than `n` arrived in time; nothing is
    ///   taken
    /// - [`Error::ConnectionClosed`] if the transport closed first
    pub async fn drain_n_messages(&self, n: usize, timeout: Option<Duration>) -> Result<Vec<Event>> {
        let deadline = self.event_deadline(timeout);
        self.router
            .inbox
            .take(n, |_| true, deadline, &format!("drain {n} events"))
            .await
    }

    /// Takes the next `n` subscribed events selected by `filter`.
    ///
    /// Events the filter does not select stay queued in order.
    ///
    /// # Errors
    ///
    /// See [`Session::drain_n_messages`].
    pub async fn drain_matching(
        &self,
        n: usize,
        filter: impl Into<EventFilter>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Event>> {
        let filter = filter.into();
        let deadline = self.event_deadline(timeout);
        let operation = format!("drain {n} events matching {filter}");
        self.router
            .inbox
            .take(n, |event| filter.matches(event), deadline, &operation)
            .await
    }

    /// Takes `n` events selected by `filter` and stable-sorts them by `key`.
    ///
    /// For events whose relative arrival order is not guaranteed.
    ///
    /// # Errors
    ///
    /// See [`Session::drain_n_messages`].
    pub async fn drain_sorted<K, F>(
        &self,
        n: usize,
        filter: impl Into<EventFilter>,
        key: F,
        timeout: Option<Duration>,
    ) -> Result<Vec<Event>>
    where
        K: Ord,
        F: FnMut(&Event) -> K,
    {
        let mut events = self.drain_matching(n, filter, timeout).await?;
        events.sort_by_key(key);
        Ok(events)
    }

    /// Succeeds if no subscribed event named in `names` is queued now or
    /// arrives within the window. Never consumes anything.
    ///
    /// An empty `names` list asserts that no event at all arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedEvent`] naming the first offending event
    /// - [`Error::ConnectionClosed`] if the transport closed inside the
    ///   window
    pub async fn assert_no_events_in_queue(
        &self,
        names: impl IntoIterator<Item = impl Into<String>>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let filter = EventFilter::names(names);
        let deadline = self.event_deadline(timeout);
        self.router
            .inbox
            .expect_none(|event| filter.matches(event), deadline, |event| {
                event.method.clone()
            })
            .await
    }

    /// Returns a copy of the queued subscribed events.
    #[must_use]
    pub fn buffered_events(&self) -> Vec<Event> {
        self.router.inbox.snapshot()
    }

    /// Removes and returns every queued subscribed event.
    pub fn clear_events(&self) -> Vec<Event> {
        self.router.inbox.take_all()
    }

    fn event_deadline(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.options.event_timeout)
    }
}

// ============================================================================
// Session - Raw Frames
// ============================================================================

impl Session {
    /// Sends a raw text frame, bypassing id allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session is closed.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.send_message(OutboundMessage::Text(text.into()))
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session is closed.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.send_message(OutboundMessage::Binary(bytes.into()))
    }

    fn send_message(&self, message: OutboundMessage) -> Result<()> {
        self.command_tx
            .send(LoopCommand::Send { id: None, message })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Waits for the next error not tied to a command.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if none arrived in time
    /// - [`Error::ConnectionClosed`] if the transport closed and none is
    ///   queued
    pub async fn next_protocol_error(&self, timeout: Option<Duration>) -> Result<ProtocolError> {
        let deadline = self.event_deadline(timeout);
        let mut errors = self
            .router
            .errors
            .take(1, |_| true, deadline, "protocol error")
            .await?;
        errors.pop().ok_or(Error::ConnectionClosed)
    }

    /// Removes and returns every queued protocol error.
    pub fn take_protocol_errors(&self) -> Vec<ProtocolError> {
        self.router.errors.take_all()
    }
}
