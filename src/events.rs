//! Lifecycle and message events.
//!
//! Every state transition produces one [`StatusEvent`]. Server-pushed calls
//! to forwarded hub methods produce a [`MessageEvent`]. Both reach the caller
//! through a [`ConnectionObserver`] or, via [`channel`], as a stream of
//! [`ConnectionEvent`]s.
//!
//! # Ordering
//!
//! Events are queued by the connection and delivered by one dispatcher task
//! per connection, so observers of one connection see them in the order the
//! transitions happened. Hub handlers run on the same task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::hub::Handler;
use crate::identifiers::ConnectionId;
use crate::protocol::Payload;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Status reported in a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Negotiating and opening a transport.
    Connecting,
    /// Transport open, invocations allowed.
    Connected,
    /// No traffic for most of the keep-alive timeout. Informational.
    ConnectionSlow,
    /// Transport dropped, retrying.
    Reconnecting,
    /// Stopped by the caller.
    Disconnected,
    /// Unrecoverable failure.
    Error,
}

impl ConnectionStatus {
    /// Returns the status name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectionSlow => "connectionSlow",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Events
// ============================================================================

/// One lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Connection id, once negotiated.
    pub connection_id: Option<ConnectionId>,
    /// New status.
    pub status: ConnectionStatus,
    /// Failure detail, if any.
    pub error_message: Option<String>,
}

/// One server-pushed call to a forwarded hub method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Hub name.
    pub hub: String,
    /// Method name as sent by the server.
    pub method: String,
    /// Call arguments.
    pub arguments: Vec<Payload>,
}

impl MessageEvent {
    /// Returns the first argument.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.arguments.first()
    }
}

/// Either kind of event, for channel consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Lifecycle notification.
    Status(StatusEvent),
    /// Forwarded hub call.
    Message(MessageEvent),
}

// ============================================================================
// ConnectionObserver
// ============================================================================

/// Receiver of connection events.
///
/// Callbacks run on the connection's dispatcher task and must not block.
/// A panicking callback is logged and does not affect other observers.
pub trait ConnectionObserver: Send + Sync {
    /// Called once per status change.
    fn on_status(&self, event: &StatusEvent);

    /// Called once per forwarded hub call.
    fn on_message(&self, event: &MessageEvent) {
        let _ = event;
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {
    fn on_status(&self, _event: &StatusEvent) {}
}

/// Observer forwarding every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionObserver for ChannelObserver {
    fn on_status(&self, event: &StatusEvent) {
        let _ = self.tx.send(ConnectionEvent::Status(event.clone()));
    }

    fn on_message(&self, event: &MessageEvent) {
        let _ = self.tx.send(ConnectionEvent::Message(event.clone()));
    }
}

/// Creates a channel-backed observer and its event stream.
#[must_use]
pub fn channel() -> (Arc<ChannelObserver>, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelObserver { tx }), rx)
}

// ============================================================================
// EventBus
// ============================================================================

type Observers = Arc<RwLock<Vec<Arc<dyn ConnectionObserver>>>>;

enum Dispatch {
    Status(StatusEvent),
    HubCall {
        message: MessageEvent,
        handlers: Vec<Handler>,
        forward: bool,
    },
}

/// Ordered fan-out of one connection's events.
///
/// Must be created inside a Tokio runtime; the dispatcher task ends when
/// the last clone is dropped.
#[derive(Clone)]
pub(crate) struct EventBus {
    queue: mpsc::UnboundedSender<Dispatch>,
    observers: Observers,
}

impl EventBus {
    pub(crate) fn new(observer: Arc<dyn ConnectionObserver>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let observers: Observers = Arc::new(RwLock::new(vec![observer]));

        tokio::spawn(dispatch_loop(rx, Arc::clone(&observers)));

        Self { queue, observers }
    }

    /// Adds an observer for subsequent events.
    pub(crate) fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.write().push(observer);
    }

    /// Queues a status event.
    pub(crate) fn emit_status(&self, event: StatusEvent) {
        trace!(status = %event.status, "Queueing status event");
        let _ = self.queue.send(Dispatch::Status(event));
    }

    /// Queues a hub call for its handlers and, if `forward`, the observers.
    pub(crate) fn emit_hub_call(&self, message: MessageEvent, handlers: Vec<Handler>, forward: bool) {
        let _ = self.queue.send(Dispatch::HubCall {
            message,
            handlers,
            forward,
        });
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Dispatch>, observers: Observers) {
    while let Some(item) = rx.recv().await {
        match item {
            Dispatch::Status(event) => {
                let snapshot = observers.read().clone();
                for observer in snapshot {
                    guarded("status observer", || observer.on_status(&event));
                }
            }
            Dispatch::HubCall {
                message,
                handlers,
                forward,
            } => {
                for handler in handlers {
                    guarded("hub handler", || handler(&message.arguments));
                }
                if forward {
                    let snapshot = observers.read().clone();
                    for observer in snapshot {
                        guarded("message observer", || observer.on_message(&message));
                    }
                }
            }
        }
    }
    debug!("Event dispatcher terminated");
}

fn guarded(what: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!(callback = what, "Callback panicked");
    }
}

// ============================================================================
// Tests
// ============================================================================
