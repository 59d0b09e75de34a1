//! Hub protocol message types.
//!
//! This module defines the frames exchanged with a hub server over the
//! HTTP-based transports.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `NegotiationResponse` | Server → Client | Connection id, token and timeouts |
//! | `PersistentResponse` | Server → Client | Cursor and batched hub messages |
//! | `HubMessage` | Server → Client | Push call to a client method |
//! | `HubResult` | Server → Client | Reply to an invocation |
//! | `HubInvocation` | Client → Server | Call to a server method |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Inbound and outbound frames |
//! | `negotiate` | Negotiation response |
//! | `payload` | Opaque argument and result values |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound and outbound frames.
pub mod message;

/// Negotiation response.
pub mod negotiate;

/// Opaque argument and result values.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{
    CLIENT_PROTOCOL, Envelope, HubFrame, HubInvocation, HubMessage, HubResult,
    PersistentResponse, ServerFrame, connection_data,
};
pub use negotiate::{AvailableTransport, Negotiation, NegotiationResponse, StartResponse};
pub use payload::Payload;
