//! Dispatch loop.
//!
//! One task owns both transport halves. It decodes inbound frames in
//! arrival order and routes them, and it writes outbound frames queued by
//! callers.
//!
//! # Routing
//!
//! | Frame | Target |
//! |-------|--------|
//! | `CommandResponse` | correlator, resolves its command |
//! | `CommandError` | correlator, fails its command |
//! | `Event` | registry, inbox and waiters |
//! | `ProtocolError` | session error sink |
//!
//! When the transport ends, errors, or the session shuts down, every
//! pending command and blocked wait fails with `ConnectionClosed`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::identifiers::CommandId;
use crate::protocol::{Event, Frame, ProtocolError};
use crate::transport::{InboundMessage, OutboundMessage, TransportParts};

use super::correlator::Correlator;
use super::registry::Registry;
use super::waiter::{BufferedQueue, WaiterId};

// ============================================================================
// LoopCommand
// ============================================================================

/// Instructions from callers to the loop.
pub(crate) enum LoopCommand {
    /// Write a frame. `id` is set when it carries a registered command.
    Send {
        id: Option<CommandId>,
        message: OutboundMessage,
    },
    /// Close the transport and stop.
    Shutdown,
}

// ============================================================================
// Router
// ============================================================================

/// State shared between the loop and session handles.
pub(crate) struct Router {
    /// Pending commands.
    pub(crate) correlator: Correlator,
    /// Subscriptions and waiters.
    pub(crate) registry: Mutex<Registry>,
    /// Subscribed events, drained by callers.
    pub(crate) inbox: Arc<BufferedQueue<Event>>,
    /// Errors not tied to a command.
    pub(crate) errors: BufferedQueue<ProtocolError>,
}

impl Router {
    pub(crate) fn new(max_pending: usize) -> Self {
        let inbox = Arc::new(BufferedQueue::new());
        Self {
            correlator: Correlator::new(max_pending),
            registry: Mutex::new(Registry::new(Arc::clone(&inbox))),
            inbox,
            errors: BufferedQueue::new(),
        }
    }

    /// Routes one decoded frame. Never blocks.
    pub(crate) fn route(&self, frame: Frame) {
        match frame {
            Frame::CommandResponse { id, result } => {
                trace!(%id, "Command response");
                self.correlator.resolve(id, Ok(result));
            }

            Frame::CommandError { id, code, message } => {
                debug!(%id, %code, %message, "Command error");
                self.correlator
                    .resolve(id, Err(Error::command(id, code, message)));
            }

            Frame::Event(event) => {
                trace!(method = %event.method, channel = %event.channel(), "Event");
                self.registry.lock().dispatch(&event);
            }

            Frame::ProtocolError(protocol_error) => {
                warn!(
                    code = %protocol_error.code,
                    message = %protocol_error.message,
                    "Protocol error"
                );
                self.errors.push(protocol_error);
            }
        }
    }

    /// Deregisters a waiter.
    pub(crate) fn remove_waiter(&self, id: WaiterId) {
        self.registry.lock().remove_waiter(id);
    }

    /// Fails everything that is still waiting.
    pub(crate) fn terminate(&self) {
        self.correlator.disconnect();
        self.registry.lock().close();
        self.errors.close();
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Runs until the transport ends or the session shuts down.
pub(crate) async fn run(
    parts: TransportParts,
    mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
    router: Arc<Router>,
    channel_field: String,
) {
    let TransportParts {
        mut sink,
        mut source,
    } = parts;

    debug!("Dispatch loop started");

    loop {
        tokio::select! {
            // Inbound frames
            message = source.receive() => {
                match message {
                    Some(Ok(InboundMessage::Text(text))) => {
                        router.route(Frame::decode(&text, &channel_field));
                    }

                    Some(Ok(InboundMessage::Binary(bytes))) => {
                        router.route(Frame::binary_rejected(bytes.len()));
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "Transport error");
                        break;
                    }

                    None => {
                        debug!("Transport closed by remote");
                        break;
                    }
                }
            }

            // Outbound frames and control
            command = command_rx.recv() => {
                match command {
                    Some(LoopCommand::Send { id, message }) => {
                        if let Err(e) = sink.send(message).await {
                            warn!(error = %e, ?id, "Failed to write frame");
                            if let Some(id) = id {
                                router.correlator.resolve(id, Err(e));
                            }
                        }
                    }

                    Some(LoopCommand::Shutdown) => {
                        debug!("Shutdown requested");
                        if let Err(e) = sink.close().await {
                            debug!(error = %e, "Close handshake failed");
                        }
                        break;
                    }

                    None => {
                        debug!("All session handles dropped");
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    router.terminate();

    debug!("Dispatch loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
