//! Event waiters.
//!
//! A [`Waiter`] is the delivery target of the dispatch loop. It is either
//! one-shot (resolved by the first matching event, then removed) or
//! buffered (an unbounded ordered [`BufferedQueue`] drained later).
//!
//! Handles returned to callers deregister their waiter on drop.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, futures::Notified, oneshot};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::Channel;
use crate::protocol::{Event, name_matches};

use super::dispatch::Router;

// ============================================================================
// EventFilter
// ============================================================================

/// Predicate applied on top of name, context and channel.
type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Selects events for a waiter.
///
/// An empty name list selects every event. Names match hierarchically:
/// `"network"` selects `"network.responseCompleted"`.
///
/// # Example
///
/// ```ignore
/// let filter = EventFilter::new("log.entryAdded")
///     .context("ctx-1")
///     .channel("A")
///     .predicate(|e| e.get_string("level") == "error");
/// ```
#[derive(Clone, Default)]
pub struct EventFilter {
    names: Vec<String>,
    contexts: Option<Vec<String>>,
    channel: Option<Channel>,
    predicate: Option<Predicate>,
}

impl EventFilter {
    /// Selects every event.
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Selects events matching `name`.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            ..Self::default()
        }
    }

    /// Selects events matching any of `names`.
    #[must_use]
    pub fn names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds another accepted name.
    #[inline]
    #[must_use]
    pub fn or(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Restricts to events from `context`. May be called repeatedly.
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.contexts
            .get_or_insert_with(Vec::new)
            .push(context.into());
        self
    }

    /// Restricts to events on `channel`.
    #[inline]
    #[must_use]
    pub fn channel(mut self, channel: impl Into<Channel>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Adds a caller-supplied predicate.
    #[inline]
    #[must_use]
    pub fn predicate(mut self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns `true` if `event` passes every part of the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let name_ok = self.names.is_empty()
            || self
                .names
                .iter()
                .any(|name| name_matches(name, &event.method));
        let context_ok = self.contexts.as_ref().is_none_or(|contexts| {
            event
                .context
                .as_ref()
                .is_some_and(|c| contexts.iter().any(|x| x == c))
        });
        let channel_ok = self
            .channel
            .as_ref()
            .is_none_or(|channel| *channel == event.channel());

        name_ok && context_ok && channel_ok && self.predicate.as_ref().is_none_or(|p| p(event))
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("names", &self.names)
            .field("contexts", &self.contexts)
            .field("channel", &self.channel)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.names.is_empty() {
            f.write_str("any event")
        } else {
            f.write_str(&self.names.join("|"))
        }
    }
}

impl From<&str> for EventFilter {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventFilter {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

// ============================================================================
// BufferedQueue
// ============================================================================

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded ordered queue with selective, deadline-bounded takes.
///
/// Pushing never blocks. Items a take does not select stay queued in
/// their original order.
pub struct BufferedQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for BufferedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferedQueue<T> {
    /// Creates an empty open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends an item. Returns `false` if the queue is closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(item);
        }
        self.notify.notify_waiters();
        true
    }

    /// Closes the queue; blocked takes that cannot be satisfied fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every queued item.
    pub fn take_all(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Removes the first item selected by `filter`, without waiting.
    pub fn try_take(&self, filter: impl Fn(&T) -> bool) -> Option<T> {
        let mut state = self.state.lock();
        let index = state.items.iter().position(filter)?;
        state.items.remove(index)
    }

    /// Waits until `n` items selected by `filter` are queued, then removes
    /// and returns exactly those, in arrival order.
    ///
    /// Nothing is removed unless all `n` are available.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `deadline` elapses first
    /// - [`Error::ConnectionClosed`] if the queue closes first
    pub async fn take(
        &self,
        n: usize,
        filter: impl Fn(&T) -> bool,
        deadline: Duration,
        operation: &str,
    ) -> Result<Vec<T>> {
        let until = Instant::now().checked_add(deadline);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                let available = state.items.iter().filter(|&item| filter(item)).count();
                if available >= n {
                    return Ok(take_selected(&mut state.items, n, &filter));
                }
                if state.closed {
                    return Err(Error::ConnectionClosed);
                }
            }

            if !notified_before(notified, until).await {
                return Err(Error::timeout(operation, deadline.as_millis() as u64));
            }
        }
    }

    /// Succeeds if no item selected by `filter` is queued now or arrives
    /// before `deadline`. Never removes anything.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedEvent`] naming the first selected item
    /// - [`Error::ConnectionClosed`] if the queue closes inside the window
    pub async fn expect_none(
        &self,
        filter: impl Fn(&T) -> bool,
        deadline: Duration,
        describe: impl Fn(&T) -> String,
    ) -> Result<()> {
        let until = Instant::now().checked_add(deadline);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if let Some(item) = state.items.iter().find(|&item| filter(item)) {
                    return Err(Error::unexpected_event(describe(item)));
                }
                if state.closed {
                    return Err(Error::ConnectionClosed);
                }
            }

            if !notified_before(notified, until).await {
                return Ok(());
            }
        }
    }
}

impl<T: Clone> BufferedQueue<T> {
    /// Returns a copy of the queued items.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.iter().cloned().collect()
    }
}

/// Waits for a wakeup until `until`. Returns `false` on timeout.
///
/// `None` means the deadline lies beyond what `Instant` can represent.
async fn notified_before(notified: Pin<&mut Notified<'_>>, until: Option<Instant>) -> bool {
    match until {
        Some(until) => timeout_at(until, notified).await.is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

/// Removes the first `n` selected items, keeping the rest in order.
fn take_selected<T>(items: &mut VecDeque<T>, n: usize, filter: impl Fn(&T) -> bool) -> Vec<T> {
    let mut taken = Vec::with_capacity(n);
    let mut kept = VecDeque::with_capacity(items.len().saturating_sub(n));

    for item in items.drain(..) {
        if taken.len() < n && filter(&item) {
            taken.push(item);
        } else {
            kept.push_back(item);
        }
    }

    *items = kept;
    taken
}

// ============================================================================
// Waiter
// ============================================================================

/// Registration id of a waiter inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(pub(crate) u64);

/// Delivery target for matching events.
pub(crate) enum Waiter {
    /// Resolved by the first match, then removed.
    OneShot(Option<oneshot::Sender<Event>>),
    /// Appends every match.
    Buffered(Arc<BufferedQueue<Event>>),
}

impl Waiter {
    /// Delivers `event`. Returns `true` if the waiter stays registered.
    pub(crate) fn deliver(&mut self, event: &Event) -> bool {
        match self {
            Self::OneShot(slot) => {
                if let Some(tx) = slot.take() {
                    let _ = tx.send(event.clone());
                }
                false
            }
            Self::Buffered(queue) => queue.push(event.clone()),
        }
    }

    /// Fails blocked readers; called on disconnect.
    pub(crate) fn close(self) {
        match self {
            // Dropping the sender wakes the receiver with an error
            Self::OneShot(_) => {}
            Self::Buffered(queue) => queue.close(),
        }
    }
}

// ============================================================================
// EventWaiter
// ============================================================================

/// Handle to a registered one-shot waiter.
///
/// Register before triggering the event, then [`EventWaiter::wait`].
/// Dropping the handle deregisters the waiter.
pub struct EventWaiter {
    id: WaiterId,
    rx: oneshot::Receiver<Event>,
    filter: String,
    router: Arc<Router>,
}

impl EventWaiter {
    pub(crate) fn new(
        id: WaiterId,
        rx: oneshot::Receiver<Event>,
        filter: &EventFilter,
        router: Arc<Router>,
    ) -> Self {
        Self {
            id,
            rx,
            filter: filter.to_string(),
            router,
        }
    }

    /// Waits for the first matching event.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing matched in time
    /// - [`Error::ConnectionClosed`] if the transport closed first
    pub async fn wait(mut self, deadline: Duration) -> Result<Event> {
        match timeout(deadline, &mut self.rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                trace!(filter = %self.filter, "Event wait timed out");
                Err(Error::timeout(
                    format!("wait for {}", self.filter),
                    deadline.as_millis() as u64,
                ))
            }
        }
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        self.router.remove_waiter(self.id);
    }
}

// ============================================================================
// EventStream
// ============================================================================

/// Handle to a registered buffered waiter with its own queue.
///
/// Receives every matching event from registration until dropped.
pub struct EventStream {
    id: WaiterId,
    queue: Arc<BufferedQueue<Event>>,
    filter: String,
    router: Arc<Router>,
}

impl EventStream {
    pub(crate) fn new(
        id: WaiterId,
        queue: Arc<BufferedQueue<Event>>,
        filter: &EventFilter,
        router: Arc<Router>,
    ) -> Self {
        Self {
            id,
            queue,
            filter: filter.to_string(),
            router,
        }
    }

    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing arrived in time
    /// - [`Error::ConnectionClosed`] if the transport closed and the
    ///   stream is empty
    pub async fn next(&self, deadline: Duration) -> Result<Event> {
        let mut events = self.take(1, deadline).await?;
        events.pop().ok_or(Error::ConnectionClosed)
    }

    /// Waits until `n` events are queued and returns them in arrival order.
    ///
    /// # Errors
    ///
    /// See [`EventStream::next`].
    pub async fn take(&self, n: usize, deadline: Duration) -> Result<Vec<Event>> {
        let operation = format!("{n} events matching {}", self.filter);
        self.queue.take(n, |_| true, deadline, &operation).await
    }

    /// Returns the next queued event without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<Event> {
        self.queue.try_take(|_| true)
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no event is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.router.remove_waiter(self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
