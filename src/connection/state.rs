//! Connection lifecycle state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::events::ConnectionStatus;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
///
/// ```text
/// Disconnected ──start──► Connecting ──► Connected ◄──► Reconnecting
///      ▲                      │              │               │
///      └────────stop──────────┴──────────────┴───────────────┤
///                                                            ▼
///                      Error ◄──── unrecoverable fault ──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started, or stopped by the caller.
    #[default]
    Disconnected,
    /// Negotiating and opening a transport.
    Connecting,
    /// Transport open.
    Connected,
    /// Transport dropped, retrying.
    Reconnecting,
    /// Failed; a new `start` begins a new session.
    Error,
}

impl ConnectionState {
    /// Returns `true` if the session is over.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Returns `true` if `start` is allowed.
    #[inline]
    #[must_use]
    pub const fn can_start(self) -> bool {
        self.is_terminal()
    }

    /// Returns the matching event status.
    #[inline]
    #[must_use]
    pub const fn status(self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected => ConnectionStatus::Connected,
            Self::Reconnecting => ConnectionStatus::Reconnecting,
            Self::Error => ConnectionStatus::Error,
        }
    }
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        state.status()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status().fmt(f)
    }
}

// ============================================================================
// Tests
// ============================================================================
