//! Server-sent-events transport.
//!
//! One long-lived `GET /connect` response carries every inbound frame as a
//! `data:` event. The first event is `initialized`, which completes the open.
//! Outbound frames go through `POST /send`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::TransportKind;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, Negotiation};

use super::http::{Endpoint, HttpClient};
use super::session::Session;
use super::{FrameSink, FrameStream, Transport, TransportEvent, cancelled};

// ============================================================================
// Constants
// ============================================================================

/// Data of the event that completes the open.
const INITIALIZED: &str = "initialized";

/// Reason reported when the server sets `T`.
const RECONNECT_REQUESTED: &str = "server requested reconnect";

/// Largest event the parser buffers before giving up on the stream.
const MAX_EVENT_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// ServerSentEventsTransport
// ============================================================================

/// Streaming transport over `text/event-stream`.
#[derive(Debug, Clone)]
pub struct ServerSentEventsTransport {
    http: Arc<HttpClient>,
}

impl ServerSentEventsTransport {
    /// Creates the transport over a shared HTTP client.
    #[must_use]
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Opens the event stream and waits for `initialized`.
    async fn connect(
        &self,
        endpoint: Endpoint,
        session: Arc<Session>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        let response = self
            .http
            .open_stream(endpoint, TransportKind::ServerSentEvents, &session)
            .await?;

        let mut stream = response.bytes_stream().boxed();
        let mut parser = EventStreamParser::default();
        let mut early = Vec::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
                chunk = stream.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return Err(Error::transport_fault(format!("event stream failed: {e}")));
                }
                None => {
                    return Err(Error::transport_fault(
                        "event stream closed before initialization",
                    ));
                }
            };

            let mut initialized = false;
            for data in parser.feed(&bytes)? {
                if !initialized && data == INITIALIZED {
                    initialized = true;
                } else {
                    early.push(data);
                }
            }
            if initialized {
                break;
            }
        }

        debug!(
            connection_id = %session.connection_id(),
            endpoint = endpoint.path(),
            "Event stream initialized"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        for data in early {
            if !deliver(&session, &tx, data) {
                return Ok(rx);
            }
        }

        tokio::spawn(read_loop(stream, parser, session, tx, cancel));

        Ok(rx)
    }
}

#[async_trait]
impl Transport for ServerSentEventsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ServerSentEvents
    }

    async fn negotiate(&self, connection_data: &str) -> Result<Negotiation> {
        self.http.negotiate(connection_data).await
    }

    async fn open(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        let frames = self
            .connect(Endpoint::Connect, Arc::clone(&session), cancel)
            .await?;
        self.http.start(self.kind(), &session).await?;
        Ok(frames)
    }

    async fn reconnect(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        self.connect(Endpoint::Reconnect, session, cancel).await
    }

    async fn send(&self, session: &Session, data: String) -> Result<Option<String>> {
        self.http.send(self.kind(), session, &data).await
    }

    async fn close(&self, session: &Session) {
        self.http.abort(self.kind(), session).await;
    }
}

// ============================================================================
// Read Loop
// ============================================================================

async fn read_loop<S, B>(
    mut stream: S,
    mut parser: EventStreamParser,
    session: Arc<Session>,
    tx: FrameSink,
    mut cancel: watch::Receiver<bool>,
) where
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send,
    B: AsRef<[u8]>,
{
    loop {
        tokio::select! {
            biased;

            _ = cancelled(&mut cancel) => {
                debug!("Event stream cancelled");
                return;
            }

            _ = tx.closed() => {
                debug!("Event stream receiver dropped");
                return;
            }

            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => match parser.feed(bytes.as_ref()) {
                    Ok(events) => {
                        for data in events {
                            if !deliver(&session, &tx, data) {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Event stream unusable");
                        let _ = tx.send(TransportEvent::Closed {
                            reason: Some(e.to_string()),
                        });
                        return;
                    }
                },
                Some(Err(e)) => {
                    warn!(error = %e, "Event stream failed");
                    let _ = tx.send(TransportEvent::Closed {
                        reason: Some(e.to_string()),
                    });
                    return;
                }
                None => {
                    debug!("Event stream ended by server");
                    let _ = tx.send(TransportEvent::Closed {
                        reason: Some("event stream ended".to_owned()),
                    });
                    return;
                }
            }
        }
    }
}

/// Forwards one frame. Returns `false` when the stream should stop.
fn deliver(session: &Session, tx: &FrameSink, data: String) -> bool {
    trace!(len = data.len(), "Event stream frame");
    let reconnect = session
        .observe(&data)
        .as_ref()
        .is_some_and(Envelope::should_reconnect);

    if tx.send(TransportEvent::Frame(data)).is_err() {
        return false;
    }
    if reconnect {
        let _ = tx.send(TransportEvent::Closed {
            reason: Some(RECONNECT_REQUESTED.to_owned()),
        });
        return false;
    }
    true
}

// ============================================================================
// EventStreamParser
// ============================================================================

/// Incremental `text/event-stream` parser yielding event data.
///
/// Only the `data` field is kept. Multiple `data` lines of one event are
/// joined with `\n`. Comment lines (`:`) and other fields are skipped.
/// A pending event larger than the limit is rejected.
#[derive(Debug)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` known to hold no line break.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_SIZE)
    }
}

impl EventStreamParser {
    /// Creates a parser that rejects events larger than `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feeds a chunk and returns the data of every completed event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] once the pending event grows past
    /// the limit. The parser is reset.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;
            self.scanned = start;
            self.line(&line, &mut events);
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() + self.data_len > self.limit {
            self.buffer.clear();
            self.scanned = 0;
            self.data.clear();
            self.data_len = 0;
            return Err(Error::protocol_violation(format!(
                "event stream event exceeds {} bytes",
                self.limit
            )));
        }
        Ok(events)
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
                self.data_len = 0;
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_len += value.len() + 1;
            self.data.push(value.to_owned());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
