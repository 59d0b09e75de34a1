//! Connection target, transport mode and hub options.
//!
//! A [`ConnectionConfig`] is immutable once a connection attempt starts:
//! the connection keeps its own copy and reuses it for every reconnect.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use url::{Url, form_urlencoded};

use crate::error::{Error, Result};

use super::reconnect::ReconnectPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on opening a transport after negotiation.
const DEFAULT_TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for negotiate, start and send requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// TransportKind
// ============================================================================

/// Concrete wire mechanism carrying frames for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Repeated blocking receive requests.
    LongPolling,
    /// One long-lived `text/event-stream` response.
    ServerSentEvents,
}

impl TransportKind {
    /// Returns the name used in the `transport` query parameter.
    #[inline]
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::LongPolling => "longPolling",
            Self::ServerSentEvents => "serverSentEvents",
        }
    }

    /// Parses a transport name as reported by a server (case-insensitive).
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        [Self::LongPolling, Self::ServerSentEvents]
            .into_iter()
            .find(|kind| kind.wire_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ============================================================================
// TransportMode
// ============================================================================

/// Requested transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Long-polling only.
    LongPolling,
    /// Server-sent-events only.
    ServerSentEvents,
    /// Try every transport in preference order.
    #[default]
    Auto,
}

impl TransportMode {
    /// Returns the transports to try, in order.
    ///
    /// `Auto` prefers the streaming transport and falls back to long-polling.
    #[inline]
    #[must_use]
    pub const fn candidates(self) -> &'static [TransportKind] {
        match self {
            Self::LongPolling => &[TransportKind::LongPolling],
            Self::ServerSentEvents => &[TransportKind::ServerSentEvents],
            Self::Auto => &[TransportKind::ServerSentEvents, TransportKind::LongPolling],
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Everything needed to open and maintain a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Base URL of the hub endpoint (e.g. `https://host/signalr`).
    pub base_url: String,

    /// Extra query parameters sent on every request. Keys are unique.
    pub query: BTreeMap<String, String>,

    /// Extra headers sent on every request.
    pub headers: BTreeMap<String, String>,

    /// Requested transport selection.
    pub transport: TransportMode,

    /// Hub whose pushed calls are forwarded to the observer.
    pub hub_name: Option<String>,

    /// Hub methods forwarded to the observer as message events.
    pub hub_methods: Vec<String>,

    /// Reconnection behavior after a drop.
    pub reconnect: ReconnectPolicy,

    /// Fail invocations that receive no result within this time.
    pub invocation_timeout: Option<Duration>,

    /// Upper bound on opening a transport after negotiation.
    pub transport_connect_timeout: Duration,

    /// Timeout for negotiate, start and send requests.
    pub request_timeout: Duration,
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionConfig {
    /// Creates a configuration for the given base URL with defaults.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            transport: TransportMode::default(),
            hub_name: None,
            hub_methods: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            invocation_timeout: None,
            transport_connect_timeout: DEFAULT_TRANSPORT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionConfig {
    /// Sets the transport mode.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, mode: TransportMode) -> Self {
        self.transport = mode;
        self
    }

    /// Adds a query parameter, replacing any previous value for `key`.
    #[inline]
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds every `key=value` pair of a raw query string.
    ///
    /// A leading `?` is ignored. Values are percent-decoded.
    #[must_use]
    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query.extend(parse_query_string(query));
        self
    }

    /// Adds a header sent on every request.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the hub whose calls are forwarded to the observer.
    #[inline]
    #[must_use]
    pub fn with_hub(mut self, name: impl Into<String>) -> Self {
        self.hub_name = Some(name.into());
        self
    }

    /// Adds a hub method forwarded to the observer.
    #[inline]
    #[must_use]
    pub fn with_hub_method(mut self, method: impl Into<String>) -> Self {
        self.hub_methods.push(method.into());
        self
    }

    /// Adds several hub methods forwarded to the observer.
    #[inline]
    #[must_use]
    pub fn with_hub_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.hub_methods.extend(methods.into_iter().map(Into::into));
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the invocation timeout.
    #[inline]
    #[must_use]
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    /// Sets the transport connect timeout.
    #[inline]
    #[must_use]
    pub fn with_transport_connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport_connect_timeout = timeout;
        self
    }

    /// Sets the timeout for negotiate, start and send requests.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionConfig {
    /// Validates the configuration and returns the parsed base URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the base URL does not parse
    /// - [`Error::Config`] for a non-HTTP scheme, an invalid header, a hub
    ///   method list without a hub, or an invalid reconnect policy
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(Error::config(format!("not a base URL: {}", self.base_url)));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("invalid header name: {name}")))?;
            HeaderValue::from_str(value)
                .map_err(|_| Error::config(format!("invalid value for header {name}")))?;
        }

        if !self.hub_methods.is_empty() && self.hub_name.is_none() {
            return Err(Error::config("hub methods require a hub name"));
        }
        if self.transport_connect_timeout.is_zero() {
            return Err(Error::config("transport connect timeout must be positive"));
        }

        self.reconnect.validate()?;

        Ok(url)
    }
}

// ============================================================================
// Query String Parsing
// ============================================================================

/// Splits a raw `k=v&k2=v2` query string into decoded pairs.
///
/// Pairs without a key are skipped. A key without `=` maps to an empty value.
pub(crate) fn parse_query_string(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("https://x");
        assert_eq!(config.transport, TransportMode::Auto);
        assert!(config.query.is_empty());
        assert!(config.hub_name.is_none());
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_builder_chain() {
        let config = ConnectionConfig::new("https://x/signalr")
            .with_transport(TransportMode::LongPolling)
            .with_query("a", "1")
            .with_query("a", "2")
            .with_header("Authorization", "Bearer t")
            .with_hub("chat")
            .with_hub_methods(["one", "two"]);

        assert_eq!(config.transport, TransportMode::LongPolling);
        assert_eq!(config.query.get("a").map(String::as_str), Some("2"));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.hub_methods, vec!["one", "two"]);
    }

    #[test]
    fn test_auto_candidates_order() {
        assert_eq!(
            TransportMode::Auto.candidates(),
            &[TransportKind::ServerSentEvents, TransportKind::LongPolling]
        );
        assert_eq!(
            TransportMode::LongPolling.candidates(),
            &[TransportKind::LongPolling]
        );
    }

    #[test]
    fn test_transport_wire_names() {
        assert_eq!(TransportKind::LongPolling.to_string(), "longPolling");
        assert_eq!(
            TransportKind::from_wire_name("ServerSentEvents"),
            Some(TransportKind::ServerSentEvents)
        );
        assert_eq!(TransportKind::from_wire_name("webSockets"), None);
    }

    #[test]
    fn test_query_string_parsing() {
        let config = ConnectionConfig::new("https://x").with_query_string("?user=bob%20s&flag&=skip");
        assert_eq!(config.query.get("user").map(String::as_str), Some("bob s"));
        assert_eq!(config.query.get("flag").map(String::as_str), Some(""));
        assert_eq!(config.query.len(), 2);
    }

    #[test]
    fn test_query_string_form_decoding() {
        let pairs = parse_query_string("name=a+b&tag=%E2%9C%93&bad=%zz&sum=1%2B1");
        assert_eq!(
            pairs,
            vec![
                ("name".to_owned(), "a b".to_owned()),
                ("tag".to_owned(), "\u{2713}".to_owned()),
                ("bad".to_owned(), "%zz".to_owned()),
                ("sum".to_owned(), "1+1".to_owned()),
            ]
        );
    }

    #[test]
    fn test_validate_accepts_https() {
        let url = ConnectionConfig::new("https://x").validate().expect("valid");
        assert_eq!(url.host_str(), Some("x"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let err = ConnectionConfig::new("ftp://x").validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_unparsable_url() {
        let err = ConnectionConfig::new("not a url").validate().unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_validate_rejects_bad_header() {
        let err = ConnectionConfig::new("https://x")
            .with_header("bad header", "v")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_methods_without_hub() {
        let err = ConnectionConfig::new("https://x")
            .with_hub_method("chatMessage")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    proptest! {
        #[test]
        fn prop_query_string_roundtrips_simple_pairs(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..6)
        ) {
            let raw = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            let parsed: BTreeMap<String, String> = parse_query_string(&raw).into_iter().collect();
            prop_assert_eq!(parsed, pairs);
        }
    }
}
