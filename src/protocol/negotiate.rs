//! Negotiation response.
//!
//! Before any transport is opened the client requests `{base}/negotiate`.
//! The server assigns a connection id and token and reports its timeouts.
//!
//! # Format
//!
//! ```json
//! {
//!   "Url": "/signalr",
//!   "ConnectionToken": "AQAAANCMnd8BFdERjHoAwE...",
//!   "ConnectionId": "1f6a2b6e-56f5-4c4c-bd5b-2f1f6f7a9a31",
//!   "KeepAliveTimeout": 20.0,
//!   "DisconnectTimeout": 30.0,
//!   "ConnectionTimeout": 110.0,
//!   "TryWebSockets": false,
//!   "ProtocolVersion": "1.5",
//!   "TransportConnectTimeout": 5.0,
//!   "LongPollDelay": 0.0
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::TransportKind;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::message::CLIENT_PROTOCOL;

// ============================================================================
// Constants
// ============================================================================

/// Used when the server omits `DisconnectTimeout`.
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Used when the server omits `ConnectionTimeout` (long-poll hold time).
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(110);

/// Used when the server omits `TransportConnectTimeout`.
const DEFAULT_TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// NegotiationResponse
// ============================================================================

/// Raw `/negotiate` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiationResponse {
    /// Server-assigned connection id.
    #[serde(default)]
    pub connection_id: String,

    /// Token echoed back on every subsequent request.
    #[serde(default)]
    pub connection_token: String,

    /// Relative endpoint URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Server protocol version.
    #[serde(default)]
    pub protocol_version: Option<String>,

    /// Seconds without traffic before the link counts as dead.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,

    /// Seconds the server keeps a dropped session.
    #[serde(default)]
    pub disconnect_timeout: Option<f64>,

    /// Seconds the server holds a long-poll request.
    #[serde(default)]
    pub connection_timeout: Option<f64>,

    /// Seconds the server allows for a transport to connect.
    #[serde(default)]
    pub transport_connect_timeout: Option<f64>,

    /// Seconds to wait between long-poll requests.
    #[serde(default)]
    pub long_poll_delay: Option<f64>,

    /// Whether the server would accept WebSockets (unused here).
    #[serde(default)]
    pub try_web_sockets: bool,

    /// Transports the server offers, when it reports them.
    #[serde(default)]
    pub available_transports: Option<Vec<AvailableTransport>>,
}

/// One entry of `AvailableTransports`, either a bare name or a descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AvailableTransport {
    /// `"ServerSentEvents"`
    Name(String),
    /// `{"transport": "ServerSentEvents", ...}`
    Described {
        /// Transport name.
        #[serde(alias = "Transport")]
        transport: String,
    },
}

impl AvailableTransport {
    fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Described { transport } => transport,
        }
    }
}

/// Body of the `/start` response.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    /// `"started"` on success.
    #[serde(rename = "Response")]
    pub response: String,
}

impl StartResponse {
    /// Returns `true` if the server acknowledged the start.
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.response.eq_ignore_ascii_case("started")
    }
}

// ============================================================================
// Negotiation
// ============================================================================

/// Validated negotiation result for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiation {
    /// Server-assigned connection id.
    pub connection_id: ConnectionId,
    /// Token echoed on every request.
    pub connection_token: String,
    /// Silence after which the link counts as dead.
    pub keep_alive: Option<Duration>,
    /// How long the server keeps a dropped session.
    pub disconnect_timeout: Duration,
    /// How long the server holds a long-poll request.
    pub connection_timeout: Duration,
    /// Server-side transport connect allowance.
    pub transport_connect_timeout: Duration,
    /// Delay between long-poll requests.
    pub long_poll_delay: Duration,
    /// Offered transports; `None` means all.
    pub transports: Option<Vec<TransportKind>>,
}

impl Negotiation {
    /// Creates a negotiation result with default timeouts.
    #[must_use]
    pub fn new(connection_id: ConnectionId, connection_token: impl Into<String>) -> Self {
        Self {
            connection_id,
            connection_token: connection_token.into(),
            keep_alive: None,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            transport_connect_timeout: DEFAULT_TRANSPORT_CONNECT_TIMEOUT,
            long_poll_delay: Duration::ZERO,
            transports: None,
        }
    }

    /// Sets the keep-alive timeout.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets how long the server keeps a dropped session.
    #[inline]
    #[must_use]
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Returns how long after a drop the same session can still be resumed.
    ///
    /// The server notices the drop up to one keep-alive period late and then
    /// keeps the session for the disconnect timeout.
    #[inline]
    #[must_use]
    pub fn resume_window(&self) -> Duration {
        self.keep_alive.unwrap_or(Duration::ZERO) + self.disconnect_timeout
    }

    /// Restricts the offered transports.
    #[inline]
    #[must_use]
    pub fn with_transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Returns `true` if the server offers `kind`.
    #[must_use]
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.transports
            .as_ref()
            .is_none_or(|offered| offered.contains(&kind))
    }
}

impl TryFrom<NegotiationResponse> for Negotiation {
    type Error = Error;

    fn try_from(raw: NegotiationResponse) -> Result<Self> {
        let connection_id = ConnectionId::new(raw.connection_id)
            .ok_or_else(|| Error::negotiation("negotiate response has no connection id"))?;
        if raw.connection_token.is_empty() {
            return Err(Error::negotiation(
                "negotiate response has no connection token",
            ));
        }
        if let Some(version) = &raw.protocol_version
            && version != CLIENT_PROTOCOL
        {
            warn!(server = %version, client = CLIENT_PROTOCOL, "Protocol version mismatch");
        }

        Ok(Self {
            connection_id,
            connection_token: raw.connection_token,
            keep_alive: seconds(raw.keep_alive_timeout),
            disconnect_timeout: seconds(raw.disconnect_timeout)
                .unwrap_or(DEFAULT_DISCONNECT_TIMEOUT),
            connection_timeout: seconds(raw.connection_timeout)
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            transport_connect_timeout: seconds(raw.transport_connect_timeout)
                .unwrap_or(DEFAULT_TRANSPORT_CONNECT_TIMEOUT),
            long_poll_delay: seconds(raw.long_poll_delay).unwrap_or(Duration::ZERO),
            transports: raw.available_transports.map(|offered| {
                offered
                    .iter()
                    .filter_map(|entry| TransportKind::from_wire_name(entry.name()))
                    .collect()
            }),
        })
    }
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}

// ============================================================================
// Tests
// ============================================================================
