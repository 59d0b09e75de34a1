//! Error types for the hub connection client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use signalr_client::{Error, Result};
//!
//! async fn example(hub: &HubProxy) -> Result<()> {
//!     let reply = hub.invoke("Send", vec![Payload::encode(&"hello")?])?.await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::NegotiationFailure`], [`Error::TransportFault`], [`Error::ConnectionClosed`], [`Error::ConnectionLost`] |
//! | State | [`Error::NotReady`] |
//! | Invocation | [`Error::InvocationFailure`], [`Error::InvocationTimeout`] |
//! | Protocol | [`Error::ProtocolViolation`] |
//! | Execution | [`Error::Timeout`] |
//! | External | [`Error::Http`], [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::InvocationId;
use crate::protocol::Payload;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Errors are `Clone` so a single failure (for example a dropped connection)
/// can be delivered to every pending invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the connection configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument supplied by the caller.
    ///
    /// Returned when an invocation argument is not a valid payload.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No transport could be negotiated or opened.
    ///
    /// Fatal for the connection attempt.
    #[error("Negotiation failed: {message}")]
    NegotiationFailure {
        /// Description of the negotiation failure.
        message: String,
    },

    /// Mid-session I/O failure on the active transport.
    ///
    /// Triggers reconnection; never fatal on its own.
    #[error("Transport fault: {message}")]
    TransportFault {
        /// Description of the fault.
        message: String,
    },

    /// The connection was stopped by the caller.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection dropped and the session could not be resumed.
    #[error("Connection lost: {message}")]
    ConnectionLost {
        /// Why the session was lost.
        message: String,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation attempted in the wrong connection state.
    ///
    /// Returned synchronously and never retried.
    #[error("Not ready: {message}")]
    NotReady {
        /// Description of the state conflict.
        message: String,
    },

    // ========================================================================
    // Invocation Errors
    // ========================================================================
    /// The server reported an error for a hub invocation.
    #[error("Invocation of {method} failed: {message}")]
    InvocationFailure {
        /// Hub method that was invoked.
        method: String,
        /// Error message reported by the server.
        message: String,
        /// Whether the hub method itself raised the error.
        hub_error: bool,
        /// Extra error data attached by the hub method.
        data: Option<Payload>,
    },

    /// No result arrived for a hub invocation in time.
    #[error("Invocation {invocation_id} timed out after {timeout_ms}ms")]
    InvocationTimeout {
        /// The invocation that timed out.
        invocation_id: InvocationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected server frame.
    ///
    /// Logged and dropped; the connection continues.
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// HTTP client error.
    #[error("HTTP error: {message}")]
    Http {
        /// Rendered `reqwest` error.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {message}")]
    Json {
        /// Rendered `serde_json` error.
        message: String,
    },

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// External Conversions
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a negotiation failure.
    #[inline]
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::NegotiationFailure {
            message: message.into(),
        }
    }

    /// Creates a transport fault.
    #[inline]
    pub fn transport_fault(message: impl Into<String>) -> Self {
        Self::TransportFault {
            message: message.into(),
        }
    }

    /// Creates a connection lost error.
    #[inline]
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Creates a not ready error.
    #[inline]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// Creates an invocation failure.
    #[inline]
    pub fn invocation_failure(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvocationFailure {
            method: method.into(),
            message: message.into(),
            hub_error: false,
            data: None,
        }
    }

    /// Creates an invocation failure raised by the hub method itself.
    #[inline]
    pub fn hub_exception(
        method: impl Into<String>,
        message: impl Into<String>,
        data: Option<Payload>,
    ) -> Self {
        Self::InvocationFailure {
            method: method.into(),
            message: message.into(),
            hub_error: true,
            data,
        }
    }

    /// Creates an invocation timeout error.
    #[inline]
    pub fn invocation_timeout(invocation_id: InvocationId, timeout_ms: u64) -> Self {
        Self::InvocationTimeout {
            invocation_id,
            timeout_ms,
        }
    }

    /// Creates a protocol violation error.
    #[inline]
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates an HTTP error.
    #[inline]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::InvocationTimeout { .. }
        )
    }

    /// Returns `true` if the operation was attempted in the wrong state.
    #[inline]
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NegotiationFailure { .. }
                | Self::TransportFault { .. }
                | Self::ConnectionClosed
                | Self::ConnectionLost { .. }
                | Self::Http { .. }
        )
    }

    /// Returns `true` if a hub method raised this invocation failure.
    #[inline]
    #[must_use]
    pub fn is_hub_error(&self) -> bool {
        matches!(self, Self::InvocationFailure { hub_error: true, .. })
    }

    /// Returns the error data a hub method attached to its failure.
    #[inline]
    #[must_use]
    pub fn error_data(&self) -> Option<&Payload> {
        match self {
            Self::InvocationFailure { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFault { .. }
                | Self::Timeout { .. }
                | Self::InvocationTimeout { .. }
                | Self::Http { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
