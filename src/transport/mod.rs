//! HTTP transport layer.
//!
//! This module carries hub frames between the client and the server over
//! plain HTTP requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                               ┌─────────────────┐
//! │  HubConnection   │   GET  /negotiate             │                 │
//! │                  │──────────────────────────────►│                 │
//! │  session loop    │   /connect, /poll (LP)        │   Hub server    │
//! │  ◄── FrameStream │◄──────────────────────────────│                 │
//! │                  │   GET /connect (SSE stream)   │                 │
//! │  send ──────────►│   POST /send  data=...        │                 │
//! └──────────────────┘──────────────────────────────►└─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`Transport::negotiate`] - obtain connection id, token and timeouts
//! 2. [`Transport::open`] - open the receive channel and send `/start`
//! 3. [`Transport::send`] - post outbound frames
//! 4. [`Transport::reconnect`] - reopen the receive channel for the same session
//! 5. [`Transport::close`] - best-effort `/abort`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `http` | Shared HTTP client and endpoint URLs |
//! | `long_polling` | Long-polling transport |
//! | `server_sent_events` | Server-sent-events transport |
//! | `session` | Per-session negotiation result and message cursor |

// ============================================================================
// Submodules
// ============================================================================

/// Shared HTTP client and endpoint URLs.
pub mod http;

/// Long-polling transport.
pub mod long_polling;

/// Server-sent-events transport.
pub mod server_sent_events;

/// Per-session negotiation result and message cursor.
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{Error, Result};
use crate::protocol::Negotiation;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::HttpClient;
pub use long_polling::LongPollingTransport;
pub use server_sent_events::ServerSentEventsTransport;
pub use session::Session;

// ============================================================================
// Types
// ============================================================================

/// Receive side of an open transport.
pub type FrameStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half used by transport receive loops.
pub type FrameSink = mpsc::UnboundedSender<TransportEvent>;

/// Item delivered on a [`FrameStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One raw inbound text frame.
    Frame(String),
    /// The receive channel ended.
    Closed {
        /// Why the channel ended, if known.
        reason: Option<String>,
    },
}

// ============================================================================
// Transport
// ============================================================================

/// Wire mechanism carrying frames for one connection.
///
/// Receive loops spawned by [`open`](Transport::open) stop when the
/// `cancel` signal turns `true` or its sender is dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns which mechanism this is.
    fn kind(&self) -> TransportKind;

    /// Returns `true` if the server sends keep-alive frames on this
    /// transport's receive channel.
    ///
    /// A long poll returns only when there is data, so the link can stay
    /// quiet for longer than the keep-alive timeout without being dead.
    fn supports_keep_alive(&self) -> bool {
        true
    }

    /// Performs the negotiation handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegotiationFailure`] if the server refuses or the
    /// response is invalid.
    async fn negotiate(&self, connection_data: &str) -> Result<Negotiation>;

    /// Opens the receive channel and completes the start handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be opened or the server does
    /// not acknowledge the start.
    async fn open(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream>;

    /// Reopens the receive channel for an existing session.
    ///
    /// # Errors
    ///
    /// Returns an error if the server no longer knows the session.
    async fn reconnect(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        let _ = (session, cancel);
        Err(Error::transport_fault(format!(
            "{} transport cannot resume a session",
            self.kind()
        )))
    }

    /// Posts one outbound frame.
    ///
    /// Returns the response body, if the server replied with one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFault`] if the request fails.
    async fn send(&self, session: &Session, data: String) -> Result<Option<String>>;

    /// Tells the server the session is over. Best effort.
    async fn close(&self, session: &Session);
}

// ============================================================================
// Helpers
// ============================================================================

/// Builds the transports for a configuration, in preference order.
///
/// # Errors
///
/// Returns [`Error::Config`] if the HTTP client cannot be built.
pub fn for_config(config: &ConnectionConfig) -> Result<Vec<Arc<dyn Transport>>> {
    let http = Arc::new(HttpClient::new(config)?);

    Ok(config
        .transport
        .candidates()
        .iter()
        .map(|kind| -> Arc<dyn Transport> {
            match kind {
                TransportKind::LongPolling => {
                    Arc::new(LongPollingTransport::new(Arc::clone(&http)))
                }
                TransportKind::ServerSentEvents => {
                    Arc::new(ServerSentEventsTransport::new(Arc::clone(&http)))
                }
            }
        })
        .collect())
}

/// Resolves when `cancel` turns `true` or its sender is dropped.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

// ============================================================================
// Tests
// ============================================================================
