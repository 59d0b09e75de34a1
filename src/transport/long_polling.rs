//! Long-polling transport.
//!
//! `POST /connect` returns the initialization response, `GET /start`
//! confirms the session, and a background loop then issues `POST /poll`
//! requests carrying the message cursor. The server holds each poll until
//! it has messages or its connection timeout elapses.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
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

/// Added to the negotiated connection timeout to bound one poll request.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// A `/reconnect` poll still pending after this long counts as resumed.
const RESUME_WINDOW: Duration = Duration::from_secs(2);

// ============================================================================
// LongPollingTransport
// ============================================================================

/// Transport issuing repeated blocking receive requests.
#[derive(Debug, Clone)]
pub struct LongPollingTransport {
    http: Arc<HttpClient>,
}

impl LongPollingTransport {
    /// Creates the transport over a shared HTTP client.
    #[must_use]
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    fn spawn_loop(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
        endpoint: Endpoint,
        delay: Duration,
        first: Option<oneshot::Sender<Result<()>>>,
    ) -> FrameStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let poll = PollLoop {
            http: Arc::clone(&self.http),
            session,
            tx,
            cancel,
        };
        tokio::spawn(poll.run(endpoint, delay, first));
        rx
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn supports_keep_alive(&self) -> bool {
        false
    }

    async fn negotiate(&self, connection_data: &str) -> Result<Negotiation> {
        self.http.negotiate(connection_data).await
    }

    async fn open(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        let body = self
            .http
            .receive(
                Endpoint::Connect,
                self.kind(),
                &session,
                poll_timeout(&session),
            )
            .await?;

        let envelope = session.observe(&body);
        if !envelope.as_ref().is_some_and(Envelope::is_initialized) {
            return Err(Error::transport_fault(
                "connect response did not initialize the session",
            ));
        }
        self.http.start(self.kind(), &session).await?;

        let delay = envelope
            .as_ref()
            .and_then(Envelope::poll_delay)
            .unwrap_or(session.negotiation().long_poll_delay);

        debug!(connection_id = %session.connection_id(), "Long polling started");
        let frames = self.spawn_loop(session, cancel, Endpoint::Poll, delay, None);
        Ok(frames)
    }

    async fn reconnect(
        &self,
        session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        let (first_tx, first_rx) = oneshot::channel();
        let frames = self.spawn_loop(
            session,
            cancel,
            Endpoint::Reconnect,
            Duration::ZERO,
            Some(first_tx),
        );

        match timeout(RESUME_WINDOW, first_rx).await {
            Ok(Ok(Ok(()))) | Err(_) => Ok(frames),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
        }
    }

    async fn send(&self, session: &Session, data: String) -> Result<Option<String>> {
        self.http.send(self.kind(), session, &data).await
    }

    async fn close(&self, session: &Session) {
        self.http.abort(self.kind(), session).await;
    }
}

fn poll_timeout(session: &Session) -> Duration {
    session.negotiation().connection_timeout + POLL_TIMEOUT_MARGIN
}

// ============================================================================
// PollLoop
// ============================================================================

struct PollLoop {
    http: Arc<HttpClient>,
    session: Arc<Session>,
    tx: FrameSink,
    cancel: watch::Receiver<bool>,
}

impl PollLoop {
    /// Polls until cancelled, the receiver is dropped, or the link fails.
    ///
    /// `first` receives the outcome of the first request, if still wanted.
    async fn run(
        mut self,
        mut endpoint: Endpoint,
        mut delay: Duration,
        mut first: Option<oneshot::Sender<Result<()>>>,
    ) {
        let request_timeout = poll_timeout(&self.session);

        loop {
            if !delay.is_zero() && !self.pause(delay).await {
                return;
            }

            let result = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => {
                    debug!("Long polling cancelled");
                    return;
                }
                _ = self.tx.closed() => return,
                result = self.http.receive(
                    endpoint,
                    TransportKind::LongPolling,
                    &self.session,
                    request_timeout,
                ) => result,
            };

            match result {
                Ok(body) => {
                    if let Some(first) = first.take() {
                        let _ = first.send(Ok(()));
                    }
                    endpoint = Endpoint::Poll;
                    delay = self.session.negotiation().long_poll_delay;

                    if body.trim().is_empty() {
                        trace!("Empty poll response");
                        continue;
                    }

                    let envelope = self.session.observe(&body);
                    if let Some(requested) = envelope.as_ref().and_then(Envelope::poll_delay) {
                        delay = requested;
                    }
                    if self.tx.send(TransportEvent::Frame(body)).is_err() {
                        return;
                    }
                    if envelope.is_some_and(|e| e.should_reconnect()) {
                        debug!("Server requested reconnect");
                        self.close("server requested reconnect".to_owned());
                        return;
                    }
                }
                Err(e) => {
                    if let Some(first) = first.take()
                        && !first.is_closed()
                    {
                        let _ = first.send(Err(e));
                        return;
                    }
                    if e.is_timeout() {
                        trace!("Poll timed out, polling again");
                        continue;
                    }
                    warn!(error = %e, "Poll failed");
                    self.close(e.to_string());
                    return;
                }
            }
        }
    }

    /// Waits `delay`. Returns `false` if the loop should stop.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = cancelled(&mut self.cancel) => false,
            _ = self.tx.closed() => false,
            _ = sleep(delay) => true,
        }
    }

    fn close(&self, reason: String) {
        let _ = self.tx.send(TransportEvent::Closed {
            reason: Some(reason),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
