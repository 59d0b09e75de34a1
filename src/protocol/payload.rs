//! Opaque invocation payloads.
//!
//! Arguments and results cross the crate boundary as serialized bytes. The
//! caller owns the encoding; this crate only checks that a payload is valid
//! JSON text before placing it on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::{Error, Result};

// ============================================================================
// Payload
// ============================================================================

/// Serialized argument or result value (UTF-8 JSON text).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Payload(Vec<u8>);

// ============================================================================
// Payload - Constructors
// ============================================================================

impl Payload {
    /// Wraps already-serialized bytes.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Wraps already-serialized JSON text.
    #[inline]
    #[must_use]
    pub fn from_json_str(json: &str) -> Self {
        Self(json.as_bytes().to_vec())
    }

    /// Returns the JSON `null` payload.
    #[inline]
    #[must_use]
    pub fn null() -> Self {
        Self(b"null".to_vec())
    }

    /// Serializes a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    pub(crate) fn from_raw(raw: &RawValue) -> Self {
        Self(raw.get().as_bytes().to_vec())
    }
}

// ============================================================================
// Payload - Accessors
// ============================================================================

impl Payload {
    /// Deserializes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the bytes do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload as text, if it is valid UTF-8.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Consumes the payload and returns its bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns `true` for an empty or JSON `null` payload.
    #[must_use]
    pub fn is_null(&self) -> bool {
        let trimmed = self.0.trim_ascii();
        trimmed.is_empty() || trimmed == b"null"
    }

    /// Validates the payload as a JSON fragment for the wire.
    pub(crate) fn to_raw(&self) -> Result<Box<RawValue>> {
        let text = std::str::from_utf8(&self.0)
            .map_err(|_| Error::invalid_argument("payload is not UTF-8"))?
            .trim();
        let text = if text.is_empty() { "null" } else { text };
        RawValue::from_string(text.to_owned())
            .map_err(|e| Error::invalid_argument(format!("payload is not valid JSON: {e}")))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Payload {
    fn from(json: &str) -> Self {
        Self::from_json_str(json)
    }
}

// ============================================================================
// Tests
// ============================================================================
