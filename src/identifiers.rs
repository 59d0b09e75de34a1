//! Type-safe identifiers for connections and invocations.
//!
//! Newtype wrappers prevent mixing a server-assigned connection id with
//! a client-generated invocation correlation id.
//!
//! | Type | Assigned by | Format |
//! |------|-------------|--------|
//! | [`ConnectionId`] | Server, during negotiation | Opaque non-empty string |
//! | [`InvocationId`] | Client, per connection | Monotonic `u64` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// ConnectionId
// ============================================================================

/// Connection identifier assigned by the negotiation response.
///
/// Immutable for the lifetime of a session. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Creates a connection id, returning `None` for an empty string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            return None;
        }
        Some(Self(Arc::from(id)))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// InvocationId
// ============================================================================

/// Correlation id for an outbound hub invocation.
///
/// Unique per connection lifetime. Sent on the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(u64);

impl InvocationId {
    /// Creates an invocation id from its numeric value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parses the wire representation.
    #[inline]
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse().ok().map(Self)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// InvocationIdGenerator
// ============================================================================

/// Hands out increasing invocation ids for one connection.
#[derive(Debug, Default)]
pub(crate) struct InvocationIdGenerator(AtomicU64);

impl InvocationIdGenerator {
    /// Returns the next unused id.
    #[inline]
    pub(crate) fn next(&self) -> InvocationId {
        InvocationId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Tests
// ============================================================================
