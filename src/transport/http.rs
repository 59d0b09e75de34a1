//! Shared HTTP client and endpoint URLs.
//!
//! Both transports talk to the same set of endpoints below the base URL:
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/negotiate` | GET | connection id, token, timeouts |
//! | `/connect` | POST (LP) / GET (SSE) | open the receive channel |
//! | `/reconnect` | POST (LP) / GET (SSE) | resume the receive channel |
//! | `/poll` | POST | next long-poll batch |
//! | `/start` | GET | confirm the session |
//! | `/send` | POST | outbound frame as form field `data` |
//! | `/abort` | POST | end the session |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{Error, Result};
use crate::protocol::{CLIENT_PROTOCOL, Negotiation, NegotiationResponse, StartResponse};

use super::session::Session;

// ============================================================================
// Constants
// ============================================================================

/// Bound on the best-effort `/abort` request.
const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Form body content type.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

// ============================================================================
// Endpoint
// ============================================================================

/// Server endpoint below the base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/negotiate`
    Negotiate,
    /// `/connect`
    Connect,
    /// `/reconnect`
    Reconnect,
    /// `/poll`
    Poll,
    /// `/start`
    Start,
    /// `/send`
    Send,
    /// `/abort`
    Abort,
}

impl Endpoint {
    /// Returns the path segment.
    #[inline]
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Negotiate => "negotiate",
            Self::Connect => "connect",
            Self::Reconnect => "reconnect",
            Self::Poll => "poll",
            Self::Start => "start",
            Self::Send => "send",
            Self::Abort => "abort",
        }
    }

    /// Returns `true` if the request resumes from the message cursor.
    #[inline]
    const fn carries_cursor(self) -> bool {
        matches!(self, Self::Reconnect | Self::Poll)
    }
}

// ============================================================================
// HttpClient
// ============================================================================

/// HTTP client bound to one hub endpoint.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    query: Vec<(String, String)>,
    request_timeout: Duration,
}

impl HttpClient {
    /// Builds a client for the configuration's base URL and headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let base_url = config.validate()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            query: config
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            request_timeout: config.request_timeout,
        })
    }
}

// ============================================================================
// HttpClient - URLs
// ============================================================================

impl HttpClient {
    /// Builds the `/negotiate` URL.
    #[must_use]
    pub fn negotiate_url(&self, connection_data: &str) -> Url {
        let mut url = self.path_url(Endpoint::Negotiate);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("clientProtocol", CLIENT_PROTOCOL);
            pairs.append_pair("connectionData", connection_data);
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Builds a session endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self, endpoint: Endpoint, kind: TransportKind, session: &Session) -> Url {
        let mut url = self.path_url(endpoint);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("transport", kind.wire_name());
            pairs.append_pair("clientProtocol", CLIENT_PROTOCOL);
            pairs.append_pair("connectionToken", session.connection_token());
            pairs.append_pair("connectionData", session.connection_data());

            if endpoint.carries_cursor() {
                if let Some(message_id) = session.message_id() {
                    pairs.append_pair("messageId", &message_id);
                }
                if let Some(groups_token) = session.groups_token() {
                    pairs.append_pair("groupsToken", &groups_token);
                }
            }

            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    fn path_url(&self, endpoint: Endpoint) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), endpoint.path());
        url.set_path(&path);
        url
    }
}

// ============================================================================
// HttpClient - Requests
// ============================================================================

impl HttpClient {
    /// Performs the negotiation request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegotiationFailure`] for any failure.
    pub async fn negotiate(&self, connection_data: &str) -> Result<Negotiation> {
        let url = self.negotiate_url(connection_data);
        debug!(url = %url, "Negotiating");

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::negotiation(format!("negotiate request failed: {e}")))?;

        let response = check_status(response, "negotiate").map_err(|e| match e {
            Error::TransportFault { message } => Error::negotiation(message),
            other => other,
        })?;

        let raw: NegotiationResponse = response
            .json()
            .await
            .map_err(|e| Error::negotiation(format!("invalid negotiate response: {e}")))?;

        Negotiation::try_from(raw)
    }

    /// Confirms the session with `/start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFault`] if the server does not answer
    /// `started`.
    pub async fn start(&self, kind: TransportKind, session: &Session) -> Result<()> {
        let url = self.endpoint_url(Endpoint::Start, kind, session);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "start", self.request_timeout))?;

        let start: StartResponse = check_status(response, "start")?
            .json()
            .await
            .map_err(|e| Error::transport_fault(format!("invalid start response: {e}")))?;

        if start.is_started() {
            Ok(())
        } else {
            Err(Error::transport_fault(format!(
                "start not acknowledged: {}",
                start.response
            )))
        }
    }

    /// Posts one outbound frame to `/send`.
    ///
    /// Returns the response body, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the request cannot be made,
    /// [`Error::TransportFault`] on an error status, or [`Error::Timeout`].
    pub async fn send(
        &self,
        kind: TransportKind,
        session: &Session,
        data: &str,
    ) -> Result<Option<String>> {
        let url = self.endpoint_url(Endpoint::Send, kind, session);
        trace!(len = data.len(), "Posting frame");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(format!("data={}", urlencoding::encode(data)))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| request_error(e, "send", self.request_timeout))?;

        let body = check_status(response, "send")?
            .text()
            .await
            .map_err(|e| Error::transport_fault(format!("send response unreadable: {e}")))?;

        Ok(Some(body).filter(|text| !text.trim().is_empty()))
    }

    /// Issues one long-poll request and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the server held the request past
    /// `timeout`, [`Error::Http`] if the request cannot be made, otherwise
    /// [`Error::TransportFault`].
    pub async fn receive(
        &self,
        endpoint: Endpoint,
        kind: TransportKind,
        session: &Session,
        timeout: Duration,
    ) -> Result<String> {
        let url = self.endpoint_url(endpoint, kind, session);
        trace!(endpoint = endpoint.path(), "Polling");

        let mut form = Vec::new();
        if let Some(message_id) = session.message_id() {
            form.push(format!("messageId={}", urlencoding::encode(&message_id)));
        }
        if let Some(groups_token) = session.groups_token() {
            form.push(format!("groupsToken={}", urlencoding::encode(&groups_token)));
        }

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form.join("&"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, endpoint.path(), timeout))?;

        check_status(response, endpoint.path())?
            .text()
            .await
            .map_err(|e| request_error(e, endpoint.path(), timeout))
    }

    /// Opens a `text/event-stream` response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the request fails, or
    /// [`Error::TransportFault`] if the server answers with an error status.
    pub async fn open_stream(
        &self,
        endpoint: Endpoint,
        kind: TransportKind,
        session: &Session,
    ) -> Result<Response> {
        let url = self.endpoint_url(endpoint, kind, session);
        debug!(endpoint = endpoint.path(), "Opening event stream");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::http(format!("{} failed: {e}", endpoint.path())))?;

        check_status(response, endpoint.path())
    }

    /// Posts `/abort`, ignoring failures.
    pub async fn abort(&self, kind: TransportKind, session: &Session) {
        let url = self.endpoint_url(Endpoint::Abort, kind, session);
        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .timeout(ABORT_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => debug!(status = %response.status(), "Abort sent"),
            Err(e) => debug!(error = %e, "Abort failed"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_status(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::transport_fault(format!(
            "{operation} returned {}",
            status_text(status)
        )))
    }
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

fn request_error(err: reqwest::Error, operation: &str, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::timeout(operation, timeout.as_millis() as u64)
    } else {
        Error::http(format!("{operation} failed: {err}"))
    }
}

// ============================================================================
// Tests
// ============================================================================
