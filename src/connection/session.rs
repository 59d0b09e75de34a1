//! Session loop.
//!
//! One task per started connection. It multiplexes inbound frames, outbound
//! invocations and keep-alive checks over the active [`Link`], and hands a
//! dropped link to the reconnection coordinator.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, trace, warn};

use crate::identifiers::InvocationId;
use crate::transport::{FrameStream, Session, Transport, TransportEvent, cancelled};

use super::core::Shared;
use super::reconnect;

// ============================================================================
// Constants
// ============================================================================

/// Bound on the best-effort transport close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor for the keep-alive check period.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Types
// ============================================================================

/// Command for the session loop.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Send a serialized hub invocation.
    Invoke { id: InvocationId, data: String },
}

/// An open transport bound to one negotiated session.
pub(crate) struct Link {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Arc<Session>,
    pub(crate) frames: FrameStream,
    pub(crate) cancel: watch::Sender<bool>,
}

impl Link {
    /// Stops the receive loop feeding this link.
    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Cancels the link and closes its transport session.
pub(crate) async fn close_link(link: Link) {
    link.cancel();
    let kind = link.transport.kind();
    if timeout(CLOSE_TIMEOUT, link.transport.close(&link.session))
        .await
        .is_err()
    {
        debug!(transport = %kind, "Transport close timed out");
    }
}

/// Why [`drive`] returned.
enum Exit {
    Shutdown,
    Dropped(Option<String>),
}

// ============================================================================
// Session Loop
// ============================================================================

/// Runs the session until it is stopped or cannot be recovered.
pub(crate) async fn run(
    shared: Arc<Shared>,
    epoch: u64,
    mut link: Link,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match drive(&shared, epoch, &mut link, &mut outbound, &mut shutdown).await {
            Exit::Shutdown => {
                debug!("Session loop shutting down");
                close_link(link).await;
                return;
            }
            Exit::Dropped(reason) => {
                debug!(reason = ?reason, "Transport dropped");
                match reconnect::recover(&shared, epoch, link, &mut shutdown, reason).await {
                    Some(next) => link = next,
                    None => return,
                }
            }
        }
    }
}

async fn drive(
    shared: &Shared,
    epoch: u64,
    link: &mut Link,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let mut monitor = link
        .session
        .negotiation()
        .keep_alive
        .filter(|_| link.transport.supports_keep_alive())
        .map(KeepAliveMonitor::new);
    let period = monitor
        .as_ref()
        .map_or(Duration::from_secs(3600), KeepAliveMonitor::check_interval);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancelled(shutdown) => return Exit::Shutdown,

            event = link.frames.recv() => match event {
                Some(TransportEvent::Frame(text)) => {
                    if let Some(monitor) = monitor.as_mut() {
                        monitor.touch();
                    }
                    shared.handle_frame(&text);
                }
                Some(TransportEvent::Closed { reason }) => return Exit::Dropped(reason),
                None => return Exit::Dropped(None),
            },

            Some(command) = outbound.recv() => {
                let Outbound::Invoke { id, data } = command;
                trace!(invocation_id = %id, "Sending invocation");

                let sent = tokio::select! {
                    biased;
                    _ = cancelled(shutdown) => None,
                    sent = link.transport.send(&link.session, data) => Some(sent),
                };
                match sent {
                    None => return Exit::Shutdown,
                    Some(Ok(Some(body))) => shared.handle_frame(&body),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        warn!(invocation_id = %id, error = %e, "Send failed");
                        shared.pending.resolve(id, |_| Err(e));
                    }
                }
            }

            _ = ticker.tick(), if monitor.is_some() => {
                let liveness = monitor
                    .as_mut()
                    .map_or(Liveness::Alive, |monitor| monitor.check(Instant::now()));
                match liveness {
                    Liveness::Alive => {}
                    Liveness::Slow => shared.emit_slow(epoch),
                    Liveness::Dead => {
                        return Exit::Dropped(Some("keep-alive timeout".to_owned()));
                    }
                }
            }
        }
    }
}

// ============================================================================
// KeepAliveMonitor
// ============================================================================

/// Result of a keep-alive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    /// Quiet for two thirds of the timeout; reported once per quiet period.
    Slow,
    /// Quiet for the whole timeout.
    Dead,
}

/// Tracks time since the last inbound frame.
#[derive(Debug)]
pub(crate) struct KeepAliveMonitor {
    timeout: Duration,
    warn_after: Duration,
    last_frame: Instant,
    warned: bool,
}

impl KeepAliveMonitor {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            warn_after: timeout * 2 / 3,
            last_frame: Instant::now(),
            warned: false,
        }
    }

    pub(crate) fn check_interval(&self) -> Duration {
        (self.timeout / 10).max(MIN_CHECK_INTERVAL)
    }

    pub(crate) fn touch(&mut self) {
        self.last_frame = Instant::now();
        self.warned = false;
    }

    pub(crate) fn check(&mut self, now: Instant) -> Liveness {
        let quiet = now.saturating_duration_since(self.last_frame);
        if quiet >= self.timeout {
            Liveness::Dead
        } else if quiet >= self.warn_after && !self.warned {
            self.warned = true;
            Liveness::Slow
        } else {
            Liveness::Alive
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
