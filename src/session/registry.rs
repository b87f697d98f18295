//! Subscription registry and event routing.
//!
//! Keeps the active subscriptions in registration order plus every
//! registered waiter, and routes each inbound event to them.
//!
//! # Matching
//!
//! An event matches a subscription when all hold:
//!
//! | Part | Rule |
//! |------|------|
//! | name | equal to a pattern, or a pattern is its module prefix, and not excluded |
//! | context | the event context is in the scope, if a scope is set |
//! | user context | `params.userContext` is in the scope, if both are present |
//! | channel | equal after normalizing `None` and `""` to the default channel |
//!
//! Subscribed events are appended to the session inbox once per frame.
//! Waiters see every event their own filter selects.
//!
//! # Unsubscribing by name
//!
//! A name hits every entry whose patterns overlap it. Patterns the name
//! covers are dropped; a module pattern that covers the name stays, with
//! the name recorded in [`Subscription::excluded`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{Channel, SubscriptionId};
use crate::protocol::{Event, EventPattern};

use super::waiter::{BufferedQueue, EventFilter, Waiter, WaiterId};

// ============================================================================
// SubscriptionRequest
// ============================================================================

/// Parameters of a new subscription.
///
/// # Example
///
/// ```ignore
/// let request = SubscriptionRequest::new(["log.entryAdded"])
///     .contexts(["ctx-1"])
///     .channel("A");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Event names or module names.
    pub events: Vec<String>,
    /// Browsing contexts to restrict to.
    pub contexts: Option<Vec<String>>,
    /// User contexts to restrict to.
    pub user_contexts: Option<Vec<String>>,
    /// Channel to subscribe on.
    pub channel: Channel,
}

impl SubscriptionRequest {
    /// Creates a global subscription request on the default channel.
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            events: events.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Restricts to browsing contexts.
    #[must_use]
    pub fn contexts(mut self, contexts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.contexts = Some(contexts.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts to user contexts.
    #[must_use]
    pub fn user_contexts(mut self, contexts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.user_contexts = Some(contexts.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the channel.
    #[inline]
    #[must_use]
    pub fn channel(mut self, channel: impl Into<Channel>) -> Self {
        self.channel = channel.into();
        self
    }
}

// ============================================================================
// Unsubscribe
// ============================================================================

/// What an unsubscribe call removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribe {
    /// Remove subscriptions by id.
    Ids(Vec<SubscriptionId>),

    /// Remove event names, optionally per context, on one channel.
    Attributes {
        /// Event names or module names.
        events: Vec<String>,
        /// Contexts the names were subscribed for; `None` for global.
        contexts: Option<Vec<String>>,
        /// Channel the names were subscribed on.
        channel: Channel,
    },
}

impl Unsubscribe {
    /// Unsubscribes by id.
    #[must_use]
    pub fn ids(ids: impl IntoIterator<Item = SubscriptionId>) -> Self {
        Self::Ids(ids.into_iter().collect())
    }

    /// Unsubscribes global event names on the default channel.
    #[must_use]
    pub fn events(events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Attributes {
            events: events.into_iter().map(Into::into).collect(),
            contexts: None,
            channel: Channel::Default,
        }
    }

    /// Scopes an attribute unsubscribe to contexts. No effect on `Ids`.
    #[must_use]
    pub fn in_contexts(mut self, scope: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let Self::Attributes { contexts, .. } = &mut self {
            *contexts = Some(scope.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Sets the channel of an attribute unsubscribe. No effect on `Ids`.
    #[must_use]
    pub fn on_channel(mut self, target: impl Into<Channel>) -> Self {
        if let Self::Attributes { channel, .. } = &mut self {
            *channel = target.into();
        }
        self
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// An active subscription.
///
/// `ids` holds every id that refers to this delivery path: subscribing
/// twice with an identical scope adds an alias instead of a second path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Ids referring to this subscription, oldest first.
    pub ids: Vec<SubscriptionId>,
    /// Event patterns.
    pub events: BTreeSet<EventPattern>,
    /// Names carved out of a module pattern by unsubscribe.
    pub excluded: BTreeSet<EventPattern>,
    /// Browsing context scope.
    pub contexts: Option<BTreeSet<String>>,
    /// User context scope.
    pub user_contexts: Option<BTreeSet<String>>,
    /// Channel.
    pub channel: Channel,
}

impl Subscription {
    fn from_request(request: &SubscriptionRequest, id: SubscriptionId) -> Result<Self> {
        let events = EventPattern::parse_all(&request.events)?.into_iter().collect();
        let contexts = scope(request.contexts.as_deref(), "contexts")?;
        let user_contexts = scope(request.user_contexts.as_deref(), "userContexts")?;

        if contexts.is_some() && user_contexts.is_some() {
            return Err(Error::invalid_argument(
                "contexts and userContexts are mutually exclusive",
            ));
        }

        Ok(Self {
            ids: vec![id],
            events,
            excluded: BTreeSet::new(),
            contexts,
            user_contexts,
            channel: request.channel.clone(),
        })
    }

    /// Returns the oldest id.
    #[must_use]
    pub fn primary_id(&self) -> Option<&SubscriptionId> {
        self.ids.first()
    }

    /// Returns `true` if `event` is selected by this subscription.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.channel == event.channel()
            && self.events.iter().any(|p| p.matches(&event.method))
            && !self.excluded.iter().any(|e| e.matches(&event.method))
            && self.contexts.as_ref().is_none_or(|scope| {
                event
                    .context
                    .as_ref()
                    .is_some_and(|context| scope.contains(context))
            })
            && self.user_contexts.as_ref().is_none_or(|scope| {
                event
                    .user_context()
                    .is_none_or(|user_context| scope.contains(user_context))
            })
    }

    fn same_scope(&self, other: &Self) -> bool {
        self.events == other.events
            && self.excluded == other.excluded
            && self.contexts == other.contexts
            && self.user_contexts == other.user_contexts
            && self.channel == other.channel
    }

    fn is_global(&self) -> bool {
        self.contexts.is_none() && self.user_contexts.is_none()
    }

    fn in_context(&self, context: &str) -> bool {
        self.contexts.as_ref().is_some_and(|c| c.contains(context))
    }

    /// Returns `true` if `name` covers a pattern or a pattern covers `name`,
    /// unless `name` was already excluded.
    fn overlaps(&self, name: &EventPattern) -> bool {
        !self.excluded.iter().any(|e| e.matches(name.as_str()))
            && self
                .events
                .iter()
                .any(|p| p.matches(name.as_str()) || name.matches(p.as_str()))
    }

    /// Returns this subscription with `name` removed, or `None` if nothing
    /// is left.
    fn without(&self, name: &EventPattern) -> Option<Self> {
        let mut rest = self.clone();
        rest.events.retain(|p| !name.matches(p.as_str()));
        if rest.events.iter().any(|p| p.matches(name.as_str())) {
            rest.excluded.retain(|e| !name.matches(e.as_str()));
            rest.excluded.insert(name.clone());
        }
        rest.prune_excluded();
        (!rest.events.is_empty()).then_some(rest)
    }

    /// Returns this subscription narrowed to what `name` selects.
    fn only(&self, name: &EventPattern) -> Self {
        let mut part = self.clone();
        part.events = self
            .events
            .iter()
            .filter(|p| name.matches(p.as_str()))
            .cloned()
            .collect();
        if self.events.iter().any(|p| p.matches(name.as_str())) {
            part.events.insert(name.clone());
        }
        part.prune_excluded();
        part
    }

    /// Drops exclusions no remaining pattern covers.
    fn prune_excluded(&mut self) {
        let events = &self.events;
        self.excluded
            .retain(|e| events.iter().any(|p| p.matches(e.as_str())));
    }
}

/// Converts an optional scope list, rejecting an empty one.
fn scope(values: Option<&[String]>, name: &str) -> Result<Option<BTreeSet<String>>> {
    match values {
        None => Ok(None),
        Some([]) => Err(Error::invalid_argument(format!("{name} must not be empty"))),
        Some(values) => Ok(Some(values.iter().cloned().collect())),
    }
}

// ============================================================================
// Registry
// ============================================================================

struct WaiterEntry {
    id: WaiterId,
    filter: EventFilter,
    waiter: Waiter,
}

/// Subscriptions and waiters of one session.
pub(crate) struct Registry {
    /// Active subscriptions in registration order.
    subscriptions: Vec<Subscription>,
    /// Registered waiters in registration order.
    waiters: Vec<WaiterEntry>,
    /// Buffered target for subscribed events.
    inbox: Arc<BufferedQueue<Event>>,
    /// Next waiter id.
    next_waiter: u64,
    /// Set on disconnect.
    closed: bool,
}

impl Registry {
    pub(crate) fn new(inbox: Arc<BufferedQueue<Event>>) -> Self {
        Self {
            subscriptions: Vec::new(),
            waiters: Vec::new(),
            inbox,
            next_waiter: 0,
            closed: false,
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Registers a subscription under `id`.
    ///
    /// An identical scope already registered gains `id` as an alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed requests.
    pub(crate) fn subscribe(
        &mut self,
        request: &SubscriptionRequest,
        id: SubscriptionId,
    ) -> Result<SubscriptionId> {
        let candidate = Subscription::from_request(request, id.clone())?;

        if let Some(existing) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.same_scope(&candidate))
        {
            debug!(%id, channel = %candidate.channel, "Identical subscription, adding alias");
            existing.ids.push(id.clone());
            return Ok(id);
        }

        debug!(%id, channel = %candidate.channel, "Subscription registered");
        self.subscriptions.push(candidate);
        Ok(id)
    }

    /// Replaces every occurrence of `from` with `to`.
    pub(crate) fn rename(&mut self, from: &SubscriptionId, to: SubscriptionId) {
        for subscription in &mut self.subscriptions {
            for id in &mut subscription.ids {
                if id == from {
                    *id = to.clone();
                }
            }
        }
    }

    /// Checks that `target` would succeed, without changing anything.
    pub(crate) fn check_unsubscribe(&self, target: &Unsubscribe) -> Result<()> {
        apply_unsubscribe(self.subscriptions.clone(), target).map(|_| ())
    }

    /// Removes what `target` names, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any id or name/context pair has
    /// no active subscription; nothing is removed in that case.
    pub(crate) fn unsubscribe(&mut self, target: &Unsubscribe) -> Result<()> {
        self.subscriptions = apply_unsubscribe(self.subscriptions.clone(), target)?;
        debug!(remaining = self.subscriptions.len(), "Unsubscribed");
        Ok(())
    }

    /// Returns a copy of the active subscriptions.
    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }

    // ========================================================================
    // Waiters
    // ========================================================================

    /// Registers a waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after disconnect.
    pub(crate) fn add_waiter(&mut self, filter: EventFilter, waiter: Waiter) -> Result<WaiterId> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let id = WaiterId(self.next_waiter);
        self.next_waiter += 1;
        self.waiters.push(WaiterEntry { id, filter, waiter });
        Ok(id)
    }

    /// Deregisters a waiter. No-op if it already left.
    pub(crate) fn remove_waiter(&mut self, id: WaiterId) {
        self.waiters.retain(|entry| entry.id != id);
    }

    /// Returns the number of registered waiters.
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Routes one event. Never blocks.
    pub(crate) fn dispatch(&mut self, event: &Event) {
        match self.subscriptions.iter().find(|s| s.matches(event)) {
            Some(subscription) => {
                trace!(
                    method = %event.method,
                    subscription = ?subscription.primary_id(),
                    "Event buffered"
                );
                self.inbox.push(event.clone());
            }
            None => trace!(method = %event.method, "Event matched no subscription"),
        }

        self.waiters
            .retain_mut(|entry| !entry.filter.matches(event) || entry.waiter.deliver(event));
    }

    /// Fails every waiter and closes the inbox.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.inbox.close();
        for entry in self.waiters.drain(..) {
            entry.waiter.close();
        }
    }
}

// ============================================================================
// Unsubscribe Planning
// ============================================================================

/// Applies `target` to a working copy, returning it only if every part
/// of `target` found an active subscription.
fn apply_unsubscribe(
    mut working: Vec<Subscription>,
    target: &Unsubscribe,
) -> Result<Vec<Subscription>> {
    match target {
        Unsubscribe::Ids(ids) => {
            if ids.is_empty() {
                return Err(Error::invalid_argument("No subscription ids given"));
            }
            let ids: FxHashSet<&SubscriptionId> = ids.iter().collect();
            for id in &ids {
                if !working.iter().any(|s| s.ids.contains(id)) {
                    return Err(Error::invalid_argument(format!(
                        "No such subscription: {id}"
                    )));
                }
            }
            for subscription in &mut working {
                subscription.ids.retain(|id| !ids.contains(id));
            }
            working.retain(|s| !s.ids.is_empty());
        }

        Unsubscribe::Attributes {
            events,
            contexts,
            channel,
        } => {
            let patterns = EventPattern::parse_all(events)?;
            match scope(contexts.as_deref(), "contexts")? {
                None => {
                    for pattern in &patterns {
                        remove_global(&mut working, pattern, channel)?;
                    }
                }
                Some(contexts) => {
                    for pattern in &patterns {
                        for context in &contexts {
                            remove_in_context(&mut working, pattern, context, channel)?;
                        }
                    }
                }
            }
        }
    }

    Ok(working)
}

fn remove_global(
    working: &mut Vec<Subscription>,
    name: &EventPattern,
    channel: &Channel,
) -> Result<()> {
    let mut found = false;
    let mut kept = Vec::with_capacity(working.len());

    for subscription in working.drain(..) {
        if subscription.channel == *channel
            && subscription.is_global()
            && subscription.overlaps(name)
        {
            found = true;
            kept.extend(subscription.without(name));
        } else {
            kept.push(subscription);
        }
    }

    if !found {
        return Err(Error::invalid_argument(format!(
            "No global subscription for {name} on channel {channel}"
        )));
    }
    *working = kept;
    Ok(())
}

fn remove_in_context(
    working: &mut Vec<Subscription>,
    name: &EventPattern,
    context: &str,
    channel: &Channel,
) -> Result<()> {
    let mut found = false;
    let mut kept = Vec::with_capacity(working.len() + 1);

    for subscription in working.drain(..) {
        if !(subscription.channel == *channel
            && subscription.in_context(context)
            && subscription.overlaps(name))
        {
            kept.push(subscription);
            continue;
        }
        found = true;

        // Split into the rest (all contexts) and `name` (other contexts)
        kept.extend(subscription.without(name));
        let mut part = subscription.only(name);
        if let Some(scope) = part.contexts.as_mut() {
            scope.remove(context);
        }
        if part.contexts.as_ref().is_some_and(|c| !c.is_empty()) {
            kept.push(part);
        }
    }

    if !found {
        return Err(Error::invalid_argument(format!(
            "No subscription for {name} in context {context} on channel {channel}"
        )));
    }
    *working = kept;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
