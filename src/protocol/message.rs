//! Wire frames of the persistent-connection hub protocol.
//!
//! # Inbound
//!
//! | Frame | Shape | Meaning |
//! |-------|-------|---------|
//! | keep-alive | `{}` or empty body | link is alive |
//! | persistent response | `{"C": .., "M": [..], "S": 1, "T": 1, "L": 0, "G": ..}` | cursor plus batched messages |
//! | hub result | `{"I": "3", "R": .., "E": .., "H": true, "D": ..}` | reply to an invocation |
//!
//! Each entry of `M` is either a hub call `{"H": hub, "M": method, "A": [..]}`
//! or, on some servers, a hub result.
//!
//! # Outbound
//!
//! Invocations are sent as `{"H": hub, "M": method, "A": [..], "I": "id"}`.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::time::Duration;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};
use crate::identifiers::InvocationId;

use super::payload::Payload;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version sent as `clientProtocol`.
pub const CLIENT_PROTOCOL: &str = "1.5";

/// Prefix of progress-report result ids.
const PROGRESS_PREFIX: &str = "P|";

// ============================================================================
// HubInvocation
// ============================================================================

/// Outbound hub method call.
#[derive(Debug, Serialize)]
pub struct HubInvocation {
    /// Hub name.
    #[serde(rename = "H")]
    pub hub: String,
    /// Method name.
    #[serde(rename = "M")]
    pub method: String,
    /// Arguments, already serialized.
    #[serde(rename = "A")]
    pub arguments: Vec<Box<RawValue>>,
    /// Correlation id, as a string.
    #[serde(rename = "I")]
    pub id: String,
}

impl HubInvocation {
    /// Builds an invocation from opaque payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any payload is not JSON text.
    pub fn new(
        hub: impl Into<String>,
        method: impl Into<String>,
        arguments: &[Payload],
        id: InvocationId,
    ) -> Result<Self> {
        let arguments = arguments
            .iter()
            .map(Payload::to_raw)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hub: hub.into(),
            method: method.into(),
            arguments,
            id: id.to_string(),
        })
    }

    /// Serializes the invocation for the `data` form field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// HubMessage
// ============================================================================

/// Server-pushed call to a client-side hub method.
#[derive(Debug, Deserialize)]
pub struct HubMessage {
    /// Hub name.
    #[serde(rename = "H")]
    pub hub: String,
    /// Method name.
    #[serde(rename = "M")]
    pub method: String,
    /// Arguments.
    #[serde(rename = "A", default)]
    pub arguments: Vec<Box<RawValue>>,
}

impl HubMessage {
    /// Converts the arguments into opaque payloads.
    #[must_use]
    pub fn payloads(&self) -> Vec<Payload> {
        self.arguments
            .iter()
            .map(|raw| Payload::from_raw(raw))
            .collect()
    }
}

// ============================================================================
// HubResult
// ============================================================================

/// Reply to an outbound invocation.
#[derive(Debug, Deserialize)]
pub struct HubResult {
    /// Correlation id echoed by the server.
    #[serde(rename = "I", deserialize_with = "string_or_number")]
    pub id: String,
    /// Return value, absent for void methods.
    #[serde(rename = "R", default)]
    pub result: Option<Box<RawValue>>,
    /// Error message, if the invocation failed.
    #[serde(rename = "E", default)]
    pub error: Option<String>,
    /// Whether the error was raised by the hub method itself.
    #[serde(rename = "H", default)]
    pub hub_error: bool,
    /// Extra error data.
    #[serde(rename = "D", default)]
    pub error_data: Option<Box<RawValue>>,
}

impl HubResult {
    /// Returns `true` for a progress report (`"P|n"`), which carries no result.
    #[inline]
    #[must_use]
    pub fn is_progress(&self) -> bool {
        self.id.starts_with(PROGRESS_PREFIX)
    }

    /// Returns the correlated invocation id, if the id is numeric.
    #[inline]
    #[must_use]
    pub fn invocation_id(&self) -> Option<InvocationId> {
        InvocationId::parse(&self.id)
    }

    /// Returns the extra error data, if any.
    #[must_use]
    pub fn error_payload(&self) -> Option<Payload> {
        self.error_data
            .as_deref()
            .map(Payload::from_raw)
            .filter(|payload| !payload.is_null())
    }

    /// Returns the result payload, or `None` for a void result.
    #[must_use]
    pub fn payload(&self) -> Option<Payload> {
        self.result
            .as_deref()
            .map(Payload::from_raw)
            .filter(|payload| !payload.is_null())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> StdResult<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

// ============================================================================
// HubFrame
// ============================================================================

/// One entry of a persistent response's `M` array.
#[derive(Debug)]
pub enum HubFrame {
    /// Server-pushed hub call.
    Call(HubMessage),
    /// Invocation result.
    Result(HubResult),
}

#[derive(Deserialize)]
struct Probe {
    #[serde(rename = "I")]
    id: Option<IgnoredAny>,
}

impl HubFrame {
    /// Decodes one message entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the entry is neither a hub
    /// call nor a hub result.
    pub fn decode(raw: &RawValue) -> Result<Self> {
        let text = raw.get();
        if !text.starts_with('{') {
            return Err(Error::protocol_violation("hub message is not an object"));
        }
        let probe: Probe = serde_json::from_str(text)
            .map_err(|e| Error::protocol_violation(format!("hub message is not an object: {e}")))?;

        if probe.id.is_some() {
            serde_json::from_str(text)
                .map(Self::Result)
                .map_err(|e| Error::protocol_violation(format!("malformed hub result: {e}")))
        } else {
            serde_json::from_str(text)
                .map(Self::Call)
                .map_err(|e| Error::protocol_violation(format!("malformed hub call: {e}")))
        }
    }
}

// ============================================================================
// PersistentResponse
// ============================================================================

/// Batched server response carrying the cursor and messages.
#[derive(Debug, Default, Deserialize)]
pub struct PersistentResponse {
    /// Message cursor.
    #[serde(rename = "C", default)]
    pub message_id: Option<String>,
    /// Set to `1` on the first response of a session.
    #[serde(rename = "S", default)]
    pub initialized: Option<u8>,
    /// Set to `1` when the server asks the client to reconnect.
    #[serde(rename = "T", default)]
    pub should_reconnect: Option<u8>,
    /// Seconds to wait before the next poll.
    #[serde(rename = "L", default)]
    pub poll_delay: Option<f64>,
    /// Groups token.
    #[serde(rename = "G", default)]
    pub groups_token: Option<String>,
    /// Messages.
    #[serde(rename = "M", default)]
    pub messages: Vec<Box<RawValue>>,
}

impl PersistentResponse {
    /// Returns `true` if the response carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_id.is_none()
            && self.initialized.is_none()
            && self.should_reconnect.is_none()
            && self.poll_delay.is_none()
            && self.groups_token.is_none()
            && self.messages.is_empty()
    }
}

// ============================================================================
// ServerFrame
// ============================================================================

/// Any inbound text frame.
#[derive(Debug)]
pub enum ServerFrame {
    /// Empty frame.
    KeepAlive,
    /// Cursor and batched messages.
    Persistent(PersistentResponse),
    /// Bare invocation result (e.g. a `/send` response body).
    Result(HubResult),
}

impl ServerFrame {
    /// Decodes one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the text is not a JSON object
    /// of a known shape.
    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::KeepAlive);
        }
        if !text.starts_with('{') {
            return Err(Error::protocol_violation("frame is not a JSON object"));
        }

        let probe: Probe = serde_json::from_str(text)
            .map_err(|e| Error::protocol_violation(format!("frame is not a JSON object: {e}")))?;

        if probe.id.is_some() {
            return serde_json::from_str(text)
                .map(Self::Result)
                .map_err(|e| Error::protocol_violation(format!("malformed hub result: {e}")));
        }

        let response: PersistentResponse = serde_json::from_str(text)
            .map_err(|e| Error::protocol_violation(format!("malformed response: {e}")))?;
        if response.is_empty() {
            Ok(Self::KeepAlive)
        } else {
            Ok(Self::Persistent(response))
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Transport-relevant fields of a persistent response, without messages.
#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    /// Message cursor.
    #[serde(rename = "C", default)]
    pub message_id: Option<String>,
    /// Groups token.
    #[serde(rename = "G", default)]
    pub groups_token: Option<String>,
    /// Reconnect request flag.
    #[serde(rename = "T", default)]
    pub reconnect: Option<u8>,
    /// Poll delay in seconds.
    #[serde(rename = "L", default)]
    pub delay: Option<f64>,
    /// Initialization flag.
    #[serde(rename = "S", default)]
    pub init: Option<u8>,
}

impl Envelope {
    /// Reads the envelope fields of a frame, if it is a JSON object.
    #[must_use]
    pub fn peek(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }

    /// Returns `true` if the server asked the client to reconnect.
    #[inline]
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        self.reconnect == Some(1)
    }

    /// Returns `true` on the initialization response.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.init == Some(1)
    }

    /// Returns the requested poll delay.
    #[must_use]
    pub fn poll_delay(&self) -> Option<Duration> {
        self.delay
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

// ============================================================================
// Connection Data
// ============================================================================

/// Builds the `connectionData` query value for the given hubs.
///
/// Hub names are sent lower-cased, as the server matches them.
#[must_use]
pub fn connection_data<'a>(hubs: impl IntoIterator<Item = &'a str>) -> String {
    #[derive(Serialize)]
    struct HubName {
        name: String,
    }

    let hubs: Vec<HubName> = hubs
        .into_iter()
        .map(|name| HubName {
            name: name.to_lowercase(),
        })
        .collect();
    serde_json::to_string(&hubs).unwrap_or_else(|_| String::from("[]"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_wire_format() {
        let invocation = HubInvocation::new(
            "chatHub",
            "Send",
            &[Payload::from(r#"{"text":"hi"}"#), Payload::from("3")],
            InvocationId::new(4),
        )
        .expect("valid");

        assert_eq!(
            invocation.to_json().expect("json"),
            r#"{"H":"chatHub","M":"Send","A":[{"text":"hi"},3],"I":"4"}"#
        );
    }

    #[test]
    fn test_invocation_rejects_bad_payload() {
        let err = HubInvocation::new("h", "m", &[Payload::from("{")], InvocationId::new(0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_decode_keep_alive() {
        assert!(matches!(ServerFrame::decode("{}"), Ok(ServerFrame::KeepAlive)));
        assert!(matches!(ServerFrame::decode("  "), Ok(ServerFrame::KeepAlive)));
    }

    #[test]
    fn test_decode_persistent_response_with_call() {
        let frame = ServerFrame::decode(
            r#"{"C":"d-1,2|A,0","M":[{"H":"ChatHub","M":"chatMessage","A":[{"text":"hi"}]}]}"#,
        )
        .expect("decode");

        let ServerFrame::Persistent(response) = frame else {
            panic!("expected persistent response");
        };
        assert_eq!(response.message_id.as_deref(), Some("d-1,2|A,0"));
        assert_eq!(response.messages.len(), 1);

        let HubFrame::Call(call) = HubFrame::decode(&response.messages[0]).expect("call") else {
            panic!("expected hub call");
        };
        assert_eq!(call.hub, "ChatHub");
        assert_eq!(call.method, "chatMessage");
        assert_eq!(call.payloads()[0].as_str(), Some(r#"{"text":"hi"}"#));
    }

    #[test]
    fn test_decode_result_frame() {
        let frame = ServerFrame::decode(r#"{"I":"7","R":{"ok":true}}"#).expect("decode");
        let ServerFrame::Result(result) = frame else {
            panic!("expected result");
        };
        assert_eq!(result.invocation_id(), Some(InvocationId::new(7)));
        assert_eq!(result.payload().expect("value").as_str(), Some(r#"{"ok":true}"#));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_decode_numeric_result_id_and_void() {
        let frame = ServerFrame::decode(r#"{"I":2,"R":null}"#).expect("decode");
        let ServerFrame::Result(result) = frame else {
            panic!("expected result");
        };
        assert_eq!(result.id, "2");
        assert!(result.payload().is_none());
    }

    #[test]
    fn test_decode_error_result() {
        let frame =
            ServerFrame::decode(r#"{"I":"1","E":"boom","H":true,"D":{"code":3}}"#).expect("decode");
        let ServerFrame::Result(result) = frame else {
            panic!("expected result");
        };
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.hub_error);
    }

    #[test]
    fn test_progress_result() {
        let frame = ServerFrame::decode(r#"{"I":"P|1","R":{"I":"1","D":50}}"#).expect("decode");
        let ServerFrame::Result(result) = frame else {
            panic!("expected result");
        };
        assert!(result.is_progress());
        assert_eq!(result.invocation_id(), None);
    }

    #[test]
    fn test_malformed_frame_is_protocol_violation() {
        let err = ServerFrame::decode("not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));

        let err = ServerFrame::decode(r#"{"M":"not an array"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn test_envelope_peek() {
        let envelope = Envelope::peek(r#"{"C":"c1","S":1,"L":2.5,"T":1,"M":[]}"#).expect("object");
        assert_eq!(envelope.message_id.as_deref(), Some("c1"));
        assert!(envelope.is_initialized());
        assert!(envelope.should_reconnect());
        assert_eq!(envelope.poll_delay(), Some(Duration::from_millis(2500)));

        assert!(Envelope::peek("[1]").is_none());
    }

    #[test]
    fn test_connection_data() {
        assert_eq!(connection_data(["ChatHub"]), r#"[{"name":"chathub"}]"#);
        assert_eq!(connection_data(Vec::<&str>::new()), "[]");
    }
}
