//! Per-session transport state.
//!
//! A [`Session`] is created from a successful negotiation and shared by the
//! receive loop and the sender. It tracks the message cursor (`C`) and the
//! groups token (`G`) so a reconnect resumes where the last frame left off.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use tracing::trace;

use crate::identifiers::ConnectionId;
use crate::protocol::{Envelope, Negotiation};

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Default)]
struct Cursor {
    message_id: Option<String>,
    groups_token: Option<String>,
}

// ============================================================================
// Session
// ============================================================================

/// Negotiated session shared between a transport's receive and send paths.
#[derive(Debug)]
pub struct Session {
    negotiation: Negotiation,
    connection_data: String,
    cursor: Mutex<Cursor>,
}

impl Session {
    /// Creates a session from a negotiation result.
    #[must_use]
    pub fn new(negotiation: Negotiation, connection_data: impl Into<String>) -> Self {
        Self {
            negotiation,
            connection_data: connection_data.into(),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Returns the server-assigned connection id.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.negotiation.connection_id
    }

    /// Returns the connection token.
    #[inline]
    #[must_use]
    pub fn connection_token(&self) -> &str {
        &self.negotiation.connection_token
    }

    /// Returns the `connectionData` query value.
    #[inline]
    #[must_use]
    pub fn connection_data(&self) -> &str {
        &self.connection_data
    }

    /// Returns the negotiation result.
    #[inline]
    #[must_use]
    pub fn negotiation(&self) -> &Negotiation {
        &self.negotiation
    }

    /// Returns the last message cursor.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.cursor.lock().message_id.clone()
    }

    /// Returns the last groups token.
    #[must_use]
    pub fn groups_token(&self) -> Option<String> {
        self.cursor.lock().groups_token.clone()
    }

    /// Records the cursor fields of an inbound frame.
    ///
    /// Returns the frame's envelope, if it is a JSON object.
    pub fn observe(&self, frame: &str) -> Option<Envelope> {
        let envelope = Envelope::peek(frame)?;

        let mut cursor = self.cursor.lock();
        if let Some(message_id) = &envelope.message_id {
            trace!(message_id = %message_id, "Cursor advanced");
            cursor.message_id = Some(message_id.clone());
        }
        if let Some(groups_token) = &envelope.groups_token {
            cursor.groups_token = Some(groups_token.clone());
        }
        drop(cursor);

        Some(envelope)
    }
}

// ============================================================================
// Tests
// ============================================================================
