//! Command correlation.
//!
//! Allocates command ids, keeps one completion slot per in-flight command
//! and resolves it when the matching response arrives.
//!
//! # Lifecycle
//!
//! ```text
//! issue ──► pending ──► resolve (response | error | disconnect)
//!              │
//!              └── await with timeout: stays pending, may be awaited again
//! ```
//!
//! Resolved outcomes nobody claims are kept for at most `max_pending`
//! commands, then evicted oldest first.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered into a completion slot.
type Outcome = Result<Value>;

/// Correlation tables, guarded together.
#[derive(Default)]
struct Tables {
    /// Write side of each unresolved command's slot.
    pending: FxHashMap<CommandId, oneshot::Sender<Outcome>>,
    /// Read side of each slot nobody has finished awaiting.
    slots: FxHashMap<CommandId, oneshot::Receiver<Outcome>>,
    /// Resolved ids in resolution order, for evicting unclaimed slots.
    resolved: VecDeque<CommandId>,
    /// Set once the transport is gone.
    closed: bool,
}

// ============================================================================
// Correlator
// ============================================================================

/// Matches command responses to issued commands by id.
pub(crate) struct Correlator {
    /// Next id to hand out. Ids start at 1 and are never reused.
    next_id: AtomicU64,
    /// Pending and awaitable slots.
    tables: Mutex<Tables>,
    /// Maximum number of unresolved commands.
    max_pending: usize,
}

impl Correlator {
    /// Creates a correlator with the given in-flight limit.
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tables: Mutex::new(Tables::default()),
            max_pending,
        }
    }

    /// Allocates an id and registers its completion slot.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after disconnect
    /// - [`Error::Protocol`] if too many commands are unresolved
    pub(crate) fn issue(&self) -> Result<CommandId> {
        let mut tables = self.tables.lock();

        if tables.closed {
            return Err(Error::ConnectionClosed);
        }

        if tables.pending.len() >= self.max_pending {
            warn!(
                pending = tables.pending.len(),
                max = self.max_pending,
                "Too many pending commands"
            );
            return Err(Error::protocol(
                "unknown error",
                format!(
                    "Too many pending commands: {}/{}",
                    tables.pending.len(),
                    self.max_pending
                ),
            ));
        }

        let id = CommandId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        tables.pending.insert(id, tx);
        tables.slots.insert(id, rx);

        trace!(%id, "Command registered");
        Ok(id)
    }

    /// Waits for the outcome of `id`.
    ///
    /// On timeout the command stays pending and its slot is kept, so the
    /// same id can be awaited again.
    ///
    /// # Errors
    ///
    /// - [`Error::Command`] if the server rejected the command
    /// - [`Error::RequestTimeout`] if `deadline` elapsed
    /// - [`Error::ConnectionClosed`] if the transport closed first
    /// - [`Error::InvalidArgument`] if `id` is unknown or already awaited
    pub(crate) async fn wait(&self, id: CommandId, deadline: Option<Duration>) -> Result<Value> {
        let mut rx = self.tables.lock().slots.remove(&id).ok_or_else(|| {
            Error::invalid_argument(format!("No awaitable command with id {id}"))
        })?;

        let Some(deadline) = deadline else {
            return rx.await.unwrap_or(Err(Error::ConnectionClosed));
        };

        match timeout(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.tables.lock().slots.insert(id, rx);
                debug!(%id, "Command await timed out, left pending");
                Err(Error::request_timeout(id, deadline.as_millis() as u64))
            }
        }
    }

    /// Resolves `id` with `outcome`.
    ///
    /// Returns `false` if no command with that id is pending. A response for
    /// an id that was already resolved is a protocol violation and is only
    /// logged.
    pub(crate) fn resolve(&self, id: CommandId, outcome: Outcome) -> bool {
        let tx = {
            let mut tables = self.tables.lock();
            let tx = tables.pending.remove(&id);
            if tx.is_some() {
                self.retain_resolved(&mut tables, id);
            }
            tx
        };

        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
                trace!(%id, "Command resolved");
                true
            }
            None if id.as_u64() < self.next_id.load(Ordering::SeqCst) => {
                warn!(%id, "Duplicate response for resolved command, ignored");
                false
            }
            None => {
                debug!(%id, "Response for unknown command, dropped");
                false
            }
        }
    }

    /// Records `id` as resolved and evicts the oldest unclaimed slots.
    fn retain_resolved(&self, tables: &mut Tables, id: CommandId) {
        tables.resolved.push_back(id);
        while tables.resolved.len() > self.max_pending {
            let Some(oldest) = tables.resolved.pop_front() else {
                break;
            };
            if tables.slots.remove(&oldest).is_some() {
                debug!(id = %oldest, "Unclaimed command outcome evicted");
            }
        }
    }

    /// Forgets the slot of `id`; a later response is still absorbed.
    pub(crate) fn discard(&self, id: CommandId) {
        self.tables.lock().slots.remove(&id);
    }

    /// Removes `id` entirely; used when its frame never reached the loop.
    pub(crate) fn cancel(&self, id: CommandId) {
        let mut tables = self.tables.lock();
        tables.pending.remove(&id);
        tables.slots.remove(&id);
    }

    /// Fails every pending command with [`Error::ConnectionClosed`].
    ///
    /// Further calls to [`Correlator::issue`] fail.
    pub(crate) fn disconnect(&self) {
        let pending: Vec<_> = {
            let mut tables = self.tables.lock();
            tables.closed = true;
            tables.pending.drain().collect()
        };

        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending commands on disconnect");
        }
    }

    /// Returns the number of unresolved commands.
    pub(crate) fn pending_count(&self) -> usize {
        self.tables.lock().pending.len()
    }

    /// Returns `true` after [`Correlator::disconnect`].
    pub(crate) fn is_closed(&self) -> bool {
        self.tables.lock().closed
    }
}

// ============================================================================
// Tests
// ============================================================================
