//! Test doubles for the transport layer.
//!
//! [`ScriptedTransport`] drives the connection state machine without a
//! network. [`TestServer`] is a minimal HTTP/1.1 server for exercising the
//! real transports against canned replies.

// ============================================================================
// Imports
// ============================================================================

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::config::TransportKind;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Negotiation;

use super::session::Session;
use super::{FrameSink, FrameStream, Transport, TransportEvent, cancelled};

// ============================================================================
// Helpers
// ============================================================================

/// Shared, ordered record of transport calls across several transports.
pub(crate) type AttemptLog = Arc<Mutex<Vec<String>>>;

/// Installs a subscriber honoring `RUST_LOG` for the test binary.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `check` until it holds, panicking after a few seconds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ============================================================================
// ScriptedTransport
// ============================================================================

#[derive(Default)]
struct Script {
    connection_ids: VecDeque<String>,
    keep_alive: Option<Duration>,
    disconnect_timeout: Option<Duration>,
    fail_negotiate: bool,
    fail_open: bool,
    fail_reconnect: bool,
    fail_send: bool,
    negotiate_delay: Option<Duration>,
    link: Option<(u64, FrameSink)>,
    generation: u64,
    sent: Vec<String>,
}

/// Transport whose behavior is scripted by the test.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    log: AttemptLog,
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn new(kind: TransportKind) -> Self {
        Self::with_log(kind, AttemptLog::default())
    }

    pub(crate) fn with_log(kind: TransportKind, log: AttemptLog) -> Self {
        Self {
            kind,
            log,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub(crate) fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Queues connection ids for successive negotiations.
    pub(crate) fn with_connection_ids(self, ids: &[&str]) -> Self {
        self.script
            .lock()
            .connection_ids
            .extend(ids.iter().map(|id| (*id).to_owned()));
        self
    }

    pub(crate) fn with_keep_alive(self, keep_alive: Duration) -> Self {
        self.script.lock().keep_alive = Some(keep_alive);
        self
    }

    /// Negotiates sessions the server keeps for only `timeout` after a drop.
    pub(crate) fn with_disconnect_timeout(self, timeout: Duration) -> Self {
        self.script.lock().disconnect_timeout = Some(timeout);
        self
    }

    pub(crate) fn with_negotiate_delay(self, delay: Duration) -> Self {
        self.set_negotiate_delay(delay);
        self
    }

    pub(crate) fn set_negotiate_delay(&self, delay: Duration) {
        self.script.lock().negotiate_delay = Some(delay);
    }

    pub(crate) fn failing_negotiate(self) -> Self {
        self.set_fail_negotiate(true);
        self
    }

    pub(crate) fn failing_open(self) -> Self {
        self.set_fail_open(true);
        self
    }

    pub(crate) fn set_fail_negotiate(&self, fail: bool) {
        self.script.lock().fail_negotiate = fail;
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.script.lock().fail_open = fail;
    }

    pub(crate) fn set_fail_reconnect(&self, fail: bool) {
        self.script.lock().fail_reconnect = fail;
    }

    pub(crate) fn set_fail_send(&self, fail: bool) {
        self.script.lock().fail_send = fail;
    }

    /// Pushes one raw frame on the open link.
    pub(crate) fn push(&self, frame: &str) {
        let script = self.script.lock();
        if let Some((_, sink)) = &script.link {
            let _ = sink.send(TransportEvent::Frame(frame.to_owned()));
        }
    }

    /// Pushes a hub call with already-serialized arguments.
    pub(crate) fn push_call(&self, hub: &str, method: &str, arguments: &[&str]) {
        self.push(&format!(
            r#"{{"C":"c","M":[{{"H":"{hub}","M":"{method}","A":[{}]}}]}}"#,
            arguments.join(",")
        ));
    }

    /// Pushes a successful result for invocation `id`.
    pub(crate) fn push_result(&self, id: u64, result: &str) {
        self.push(&format!(r#"{{"I":"{id}","R":{result}}}"#));
    }

    /// Pushes a failed result for invocation `id`.
    pub(crate) fn push_error(&self, id: u64, message: &str) {
        self.push(&format!(r#"{{"I":"{id}","E":"{message}"}}"#));
    }

    /// Simulates the server dropping the receive channel.
    pub(crate) fn drop_link(&self) {
        if let Some((_, sink)) = self.script.lock().link.take() {
            let _ = sink.send(TransportEvent::Closed {
                reason: Some("scripted drop".to_owned()),
            });
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.script
            .lock()
            .link
            .as_ref()
            .is_some_and(|(_, sink)| !sink.is_closed())
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    /// Waits until at least `count` frames were sent.
    pub(crate) async fn wait_for_send(&self, count: usize) {
        eventually(|| self.script.lock().sent.len() >= count).await;
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, call: &str) {
        self.log.lock().push(format!("{}:{call}", self.kind));
    }

    fn link(&self, mut cancel: watch::Receiver<bool>) -> FrameStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut script = self.script.lock();
            script.generation += 1;
            script.link = Some((script.generation, tx));
            script.generation
        };

        let script = Arc::clone(&self.script);
        tokio::spawn(async move {
            cancelled(&mut cancel).await;
            let mut script = script.lock();
            if script
                .link
                .as_ref()
                .is_some_and(|(current, _)| *current == generation)
            {
                script.link = None;
            }
        });

        rx
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn supports_keep_alive(&self) -> bool {
        self.kind != TransportKind::LongPolling
    }

    async fn negotiate(&self, _connection_data: &str) -> Result<Negotiation> {
        self.record("negotiate");
        let delay = self.script.lock().negotiate_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        if script.fail_negotiate {
            return Err(Error::negotiation("scripted negotiate failure"));
        }
        let id = script
            .connection_ids
            .pop_front()
            .unwrap_or_else(|| "test-connection".to_owned());
        let connection_id = ConnectionId::new(id.clone()).ok_or_else(|| Error::negotiation("empty id"))?;
        let negotiation =
            Negotiation::new(connection_id, format!("token-{id}")).with_keep_alive(script.keep_alive);
        Ok(match script.disconnect_timeout {
            Some(timeout) => negotiation.with_disconnect_timeout(timeout),
            None => negotiation,
        })
    }

    async fn open(
        &self,
        _session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        self.record("open");
        if self.script.lock().fail_open {
            return Err(Error::transport_fault("scripted open failure"));
        }
        Ok(self.link(cancel))
    }

    async fn reconnect(
        &self,
        _session: Arc<Session>,
        cancel: watch::Receiver<bool>,
    ) -> Result<FrameStream> {
        self.record("reconnect");
        if self.script.lock().fail_reconnect {
            return Err(Error::transport_fault("scripted reconnect failure"));
        }
        Ok(self.link(cancel))
    }

    async fn send(&self, _session: &Session, data: String) -> Result<Option<String>> {
        let mut script = self.script.lock();
        if script.fail_send {
            return Err(Error::transport_fault("scripted send failure"));
        }
        script.sent.push(data);
        Ok(None)
    }

    async fn close(&self, _session: &Session) {
        self.record("close");
    }
}

// ============================================================================
// TestServer
// ============================================================================

/// Canned reply for one request.
pub(crate) enum Reply {
    /// `200 OK` with a JSON (or empty) body.
    Json(String),
    /// `200 OK` event stream; each received chunk is written as-is.
    Stream(mpsc::UnboundedReceiver<String>),
    /// Never answers.
    Hang,
    /// Empty response with the given status.
    Status(u16),
}

/// A request the server received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) endpoint: String,
    pub(crate) query: String,
    pub(crate) body: String,
}

#[derive(Default)]
struct ServerState {
    requests: Vec<RecordedRequest>,
    replies: HashMap<String, VecDeque<Reply>>,
}

/// Minimal HTTP/1.1 server answering hub endpoints with queued replies.
///
/// Endpoints without a queued reply answer with a default: a valid
/// negotiation, a `started` acknowledgement, empty `send`/`abort` bodies,
/// and hanging receive requests.
pub(crate) struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self { addr, state }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}/signalr", self.addr)
    }

    /// Queues a reply for the next request to `endpoint` (e.g. `"poll"`).
    pub(crate) fn reply(&self, endpoint: &str, reply: Reply) {
        self.state
            .lock()
            .replies
            .entry(endpoint.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }
}

fn default_reply(endpoint: &str) -> Reply {
    match endpoint {
        "negotiate" => Reply::Json(
            r#"{"Url":"/signalr","ConnectionToken":"server-token","ConnectionId":"server-conn","KeepAliveTimeout":20.0,"DisconnectTimeout":30.0,"ConnectionTimeout":110.0,"TryWebSockets":false,"ProtocolVersion":"1.5","TransportConnectTimeout":5.0,"LongPollDelay":0.0}"#
                .to_owned(),
        ),
        "start" => Reply::Json(r#"{"Response":"started"}"#.to_owned()),
        "send" | "abort" => Reply::Json(String::new()),
        _ => Reply::Hang,
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let target = request_line.next().unwrap_or_default().to_owned();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[head_end + 4..].to_vec();
    while body.len() < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let endpoint = path.rsplit('/').next().unwrap_or_default().to_owned();

    let reply = {
        let mut state = state.lock();
        state.requests.push(RecordedRequest {
            method,
            endpoint: endpoint.clone(),
            query: query.to_owned(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        state
            .replies
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
    }
    .unwrap_or_else(|| default_reply(&endpoint));

    match reply {
        Reply::Json(body) => {
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Status(code) => {
            let response = format!(
                "HTTP/1.1 {code} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Stream(mut chunks) => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            while let Some(chunk) = chunks.recv().await {
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
            }
            let _ = socket.shutdown().await;
        }
        Reply::Hang => {
            std::future::pending::<()>().await;
        }
    }
}
