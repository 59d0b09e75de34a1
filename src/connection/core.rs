//! Hub connection and its state machine.
//!
//! A [`HubConnection`] owns one logical session at a time. All transitions
//! happen under the session lock and emit their status event while holding
//! it, so observers see transitions in the order they happened.
//!
//! # Lifecycle
//!
//! 1. [`HubConnection::start`] - negotiate, open a transport, emit `Connected`
//! 2. A session loop task carries frames, sends and keep-alive checks
//! 3. On a drop the loop hands over to the reconnection coordinator
//! 4. [`HubConnection::stop`] - cancel everything, emit `Disconnected`

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{Error, Result};
use crate::events::{
    ConnectionEvent, ConnectionObserver, ConnectionStatus, EventBus, MessageEvent, StatusEvent,
    channel,
};
use crate::hub::{HubProxy, Invocation, PendingInvocations};
use crate::identifiers::{ConnectionId, InvocationIdGenerator};
use crate::protocol::{
    HubFrame, HubInvocation, HubMessage, HubResult, Negotiation, Payload, ServerFrame,
    connection_data,
};
use crate::transport::{self, Session, Transport, cancelled};

use super::session::{self as session_loop, Link, Outbound};
use super::state::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Bound on waiting for the session loop to wind down after `stop`.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Shared State
// ============================================================================

/// Mutable session state guarded by the session lock.
pub(crate) struct SessionSlot {
    pub(crate) state: ConnectionState,
    pub(crate) connection_id: Option<ConnectionId>,
    pub(crate) last_error: Option<Error>,
    /// Incremented by every `start` and `stop`; stale tasks compare it.
    pub(crate) epoch: u64,
    pub(crate) shutdown: Option<watch::Sender<bool>>,
    pub(crate) transport: Option<TransportKind>,
    pub(crate) outbound: Option<mpsc::UnboundedSender<Outbound>>,
    pub(crate) task: Option<JoinHandle<()>>,
}

/// State shared by the connection handle, its hubs and its session task.
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    transports: Vec<Arc<dyn Transport>>,
    pub(crate) bus: EventBus,
    hubs: Mutex<FxHashMap<String, HubProxy>>,
    pub(crate) pending: Arc<PendingInvocations>,
    ids: InvocationIdGenerator,
    pub(crate) session: Mutex<SessionSlot>,
}

// ============================================================================
// HubConnection
// ============================================================================

/// Persistent connection to a hub server.
///
/// Cloning is cheap; clones control the same connection. Must be created
/// inside a Tokio runtime. Dropping every handle does not stop a running
/// session; call [`stop`](Self::stop).
#[derive(Clone)]
pub struct HubConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.session.lock();
        f.debug_struct("HubConnection")
            .field("base_url", &self.shared.config.base_url)
            .field("state", &slot.state)
            .field("connection_id", &slot.connection_id)
            .finish()
    }
}

// ============================================================================
// HubConnection - Constructors
// ============================================================================

impl HubConnection {
    /// Creates a connection using the HTTP transports for the configured mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Url`] if the configuration is
    /// invalid.
    pub fn new(config: ConnectionConfig, observer: Arc<dyn ConnectionObserver>) -> Result<Self> {
        config.validate()?;
        let transports = transport::for_config(&config)?;
        Self::with_transports(config, observer, transports)
    }

    /// Creates a connection over the given transports.
    ///
    /// Transports are tried in the configured mode's preference order;
    /// transports of a kind the mode excludes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or no
    /// transport matches the mode.
    pub fn with_transports(
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Result<Self> {
        config.validate()?;

        let ordered: Vec<_> = config
            .transport
            .candidates()
            .iter()
            .filter_map(|kind| transports.iter().find(|t| t.kind() == *kind).cloned())
            .collect();
        if ordered.is_empty() {
            return Err(Error::config(format!(
                "no transport available for mode {:?}",
                config.transport
            )));
        }

        let hub_name = config.hub_name.clone();
        let connection = Self {
            shared: Arc::new(Shared {
                config,
                transports: ordered,
                bus: EventBus::new(observer),
                hubs: Mutex::new(FxHashMap::default()),
                pending: Arc::new(PendingInvocations::default()),
                ids: InvocationIdGenerator::default(),
                session: Mutex::new(SessionSlot {
                    state: ConnectionState::Disconnected,
                    connection_id: None,
                    last_error: None,
                    epoch: 0,
                    shutdown: None,
                    transport: None,
                    outbound: None,
                    task: None,
                }),
            }),
        };

        if let Some(name) = hub_name {
            connection.hub(&name);
        }

        Ok(connection)
    }
}

// ============================================================================
// HubConnection - Accessors
// ============================================================================

impl HubConnection {
    /// Returns the proxy for hub `name`, creating it if needed.
    ///
    /// Hubs should be created before [`start`](Self::start); the server only
    /// pushes calls for hubs named during negotiation.
    pub fn hub(&self, name: &str) -> HubProxy {
        let active = !self.state().is_terminal();
        let mut hubs = self.shared.hubs.lock();
        hubs.entry(name.to_lowercase())
            .or_insert_with(|| {
                if active {
                    warn!(hub = name, "Hub created on an active connection");
                }
                HubProxy::new(name, Arc::downgrade(&self.shared))
            })
            .clone()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    /// Returns the negotiated connection id, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.session.lock().connection_id.clone()
    }

    /// Returns `true` while `Connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the error that ended the last session, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<Error> {
        self.shared.session.lock().last_error.clone()
    }

    /// Returns the kind of the active transport, if any.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.shared.session.lock().transport
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Returns the number of unanswered invocations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Adds an observer for subsequent events.
    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) {
        self.shared.bus.subscribe(observer);
    }

    /// Returns a stream of subsequent events.
    #[must_use]
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (observer, rx) = channel();
        self.subscribe(observer);
        rx
    }
}

// ============================================================================
// HubConnection - Lifecycle
// ============================================================================

impl HubConnection {
    /// Negotiates and opens a transport.
    ///
    /// Emits `Connecting`, then `Connected` or `Error`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] unless `Disconnected` or `Error`
    /// - [`Error::NegotiationFailure`] if no transport could be opened
    /// - [`Error::ConnectionClosed`] if [`stop`](Self::stop) interrupted it
    pub async fn start(&self) -> Result<ConnectionId> {
        let shared = &self.shared;

        let (epoch, mut shutdown) = {
            let mut slot = shared.session.lock();
            if !slot.state.can_start() {
                return Err(Error::not_ready(format!(
                    "cannot start while {}",
                    slot.state
                )));
            }
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            slot.epoch += 1;
            slot.shutdown = Some(shutdown_tx);
            slot.connection_id = None;
            slot.last_error = None;
            slot.transport = None;
            shared.transition(&mut slot, ConnectionState::Connecting, None);
            (slot.epoch, shutdown_rx)
        };

        info!(url = %shared.config.base_url, "Connecting");

        let established = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => {
                debug!("Start interrupted by stop");
                return Err(Error::ConnectionClosed);
            }
            result = shared.establish() => result,
        };

        match established {
            Ok(link) => shared.activate(epoch, link, shutdown),
            Err(e) => {
                shared.fail_start(epoch, &e);
                Err(e)
            }
        }
    }

    /// Stops the connection.
    ///
    /// Fails every pending invocation with [`Error::ConnectionClosed`],
    /// closes the transport and emits `Disconnected`. A no-op when already
    /// `Disconnected` or `Error`.
    pub async fn stop(&self) {
        let shared = &self.shared;

        let task = {
            let mut slot = shared.session.lock();
            if slot.state.is_terminal() {
                debug!(state = %slot.state, "Stop ignored");
                return;
            }
            slot.epoch += 1;
            slot.outbound = None;
            slot.transport = None;
            if let Some(shutdown) = slot.shutdown.take() {
                shutdown.send_replace(true);
            }
            shared.transition(&mut slot, ConnectionState::Disconnected, None);
            slot.task.take()
        };

        shared.pending.fail_all(&Error::ConnectionClosed);
        info!("Connection stopped");

        if let Some(task) = task
            && timeout(STOP_TIMEOUT, task).await.is_err()
        {
            warn!("Session loop did not stop in time");
        }
    }
}

// ============================================================================
// Shared - Transitions
// ============================================================================

impl Shared {
    /// Moves to `state` and emits its status event. Caller holds the lock.
    pub(crate) fn transition(
        &self,
        slot: &mut SessionSlot,
        state: ConnectionState,
        error_message: Option<String>,
    ) {
        debug!(from = %slot.state, to = %state, "State transition");
        slot.state = state;
        self.bus.emit_status(StatusEvent {
            connection_id: slot.connection_id.clone(),
            status: state.status(),
            error_message,
        });
    }

    /// Installs an established link and spawns the session loop.
    fn activate(
        self: &Arc<Self>,
        epoch: u64,
        link: Link,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ConnectionId> {
        let mut slot = self.session.lock();
        if slot.epoch != epoch || slot.state != ConnectionState::Connecting {
            drop(slot);
            debug!("Connection stopped while opening, discarding transport");
            tokio::spawn(session_loop::close_link(link));
            return Err(Error::ConnectionClosed);
        }

        let id = link.session.connection_id().clone();
        let kind = link.transport.kind();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        slot.connection_id = Some(id.clone());
        slot.transport = Some(kind);
        slot.outbound = Some(outbound_tx);
        self.transition(&mut slot, ConnectionState::Connected, None);
        slot.task = Some(tokio::spawn(session_loop::run(
            Arc::clone(self),
            epoch,
            link,
            outbound_rx,
            shutdown,
        )));
        drop(slot);

        info!(connection_id = %id, transport = %kind, "Connected");
        Ok(id)
    }

    /// Records a failed start.
    fn fail_start(&self, epoch: u64, error: &Error) {
        let mut slot = self.session.lock();
        if slot.epoch != epoch || slot.state != ConnectionState::Connecting {
            return;
        }
        warn!(error = %error, "Connection failed");
        slot.last_error = Some(error.clone());
        slot.shutdown = None;
        self.transition(&mut slot, ConnectionState::Error, Some(error.to_string()));
    }

    /// Emits `ConnectionSlow` without changing state.
    pub(crate) fn emit_slow(&self, epoch: u64) {
        let slot = self.session.lock();
        if slot.epoch != epoch || slot.state != ConnectionState::Connected {
            return;
        }
        warn!("Connection slow, no traffic for most of the keep-alive timeout");
        self.bus.emit_status(StatusEvent {
            connection_id: slot.connection_id.clone(),
            status: ConnectionStatus::ConnectionSlow,
            error_message: None,
        });
    }
}

// ============================================================================
// Shared - Establishing
// ============================================================================

impl Shared {
    /// Returns the `connectionData` value for the registered hubs.
    fn connection_data(&self) -> String {
        let mut names: Vec<String> = self
            .hubs
            .lock()
            .values()
            .map(|hub| hub.name().to_owned())
            .collect();
        names.sort();
        connection_data(names.iter().map(String::as_str))
    }

    /// Tries each transport in order until one opens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegotiationFailure`] listing every failure.
    pub(crate) async fn establish(&self) -> Result<Link> {
        let connection_data = self.connection_data();
        let mut failures = Vec::with_capacity(self.transports.len());

        for transport in &self.transports {
            match self.try_transport(transport, &connection_data).await {
                Ok(link) => return Ok(link),
                Err(e) => {
                    warn!(transport = %transport.kind(), error = %e, "Transport failed");
                    failures.push(format!("{}: {e}", transport.kind()));
                }
            }
        }

        Err(Error::negotiation(format!(
            "no transport could be opened ({})",
            failures.join("; ")
        )))
    }

    async fn try_transport(
        &self,
        transport: &Arc<dyn Transport>,
        connection_data: &str,
    ) -> Result<Link> {
        let kind = transport.kind();
        debug!(transport = %kind, "Trying transport");

        let negotiation = transport.negotiate(connection_data).await?;
        if !negotiation.supports(kind) {
            return Err(Error::negotiation(format!("server does not offer {kind}")));
        }

        let limit = self.open_timeout(&negotiation);
        let session = Arc::new(Session::new(negotiation, connection_data));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let frames = timeout(limit, transport.open(Arc::clone(&session), cancel_rx))
            .await
            .map_err(|_| Error::timeout(format!("opening {kind}"), limit.as_millis() as u64))??;

        Ok(Link {
            transport: Arc::clone(transport),
            session,
            frames,
            cancel: cancel_tx,
        })
    }

    /// Time allowed to open a transport: the local allowance plus the one the
    /// server granted during negotiation.
    pub(crate) fn open_timeout(&self, negotiation: &Negotiation) -> Duration {
        self.config.transport_connect_timeout + negotiation.transport_connect_timeout
    }
}

// ============================================================================
// Shared - Invocations
// ============================================================================

impl Shared {
    /// Queues an invocation on the active session.
    pub(crate) fn invoke(
        &self,
        hub: &str,
        method: &str,
        arguments: &[Payload],
    ) -> Result<Invocation> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let slot = self.session.lock();
            let outbound = match (&slot.state, &slot.outbound) {
                (ConnectionState::Connected, Some(outbound)) => outbound,
                _ => return Err(Error::not_ready("hub not ready")),
            };

            let id = self.ids.next();
            let data = HubInvocation::new(hub, method, arguments, id)?.to_json()?;
            self.pending
                .register(id, method, slot.connection_id.clone(), tx);
            if outbound.send(Outbound::Invoke { id, data }).is_err() {
                self.pending.resolve(id, |_| Err(Error::ConnectionClosed));
                return Err(Error::ConnectionClosed);
            }
            id
        };

        trace!(invocation_id = %id, hub, method, "Invocation queued");

        if let Some(limit) = self.config.invocation_timeout {
            let pending = Arc::clone(&self.pending);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let expired = pending.resolve(id, |_| {
                    Err(Error::invocation_timeout(id, limit.as_millis() as u64))
                });
                if expired {
                    debug!(invocation_id = %id, "Invocation timed out");
                }
            });
            self.pending.set_timer(id, timer.abort_handle());
        }

        Ok(Invocation::new(id, method, rx))
    }
}

// ============================================================================
// Shared - Inbound Frames
// ============================================================================

impl Shared {
    /// Decodes one inbound frame and routes its contents.
    ///
    /// Malformed frames are logged and dropped.
    pub(crate) fn handle_frame(&self, text: &str) {
        match ServerFrame::decode(text) {
            Ok(ServerFrame::KeepAlive) => trace!("Keep-alive"),
            Ok(ServerFrame::Result(result)) => self.resolve(&result),
            Ok(ServerFrame::Persistent(response)) => {
                for raw in &response.messages {
                    match HubFrame::decode(raw) {
                        Ok(HubFrame::Call(message)) => self.route(&message),
                        Ok(HubFrame::Result(result)) => self.resolve(&result),
                        Err(e) => warn!(error = %e, "Dropping malformed hub message"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }

    fn route(&self, message: &HubMessage) {
        let proxy = self.hubs.lock().get(&message.hub.to_lowercase()).cloned();
        let Some(proxy) = proxy else {
            debug!(hub = %message.hub, method = %message.method, "Call for unknown hub");
            return;
        };

        let handlers = proxy.handlers_for(&message.method);
        let forward = self.forwards(&message.hub, &message.method);
        if handlers.is_empty() && !forward {
            trace!(hub = %message.hub, method = %message.method, "No handler for call");
            return;
        }

        self.bus.emit_hub_call(
            MessageEvent {
                hub: proxy.name().to_owned(),
                method: message.method.clone(),
                arguments: message.payloads(),
            },
            handlers,
            forward,
        );
    }

    /// Returns `true` if calls to `hub.method` go to the observers.
    fn forwards(&self, hub: &str, method: &str) -> bool {
        self.config
            .hub_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(hub))
            && self
                .config
                .hub_methods
                .iter()
                .any(|forwarded| forwarded.eq_ignore_ascii_case(method))
    }

    fn resolve(&self, result: &HubResult) {
        if result.is_progress() {
            trace!(id = %result.id, "Ignoring progress report");
            return;
        }
        let Some(id) = result.invocation_id() else {
            warn!(id = %result.id, "Result with unrecognized invocation id");
            return;
        };

        let resolved = self.pending.resolve(id, |method| match &result.error {
            Some(message) if result.hub_error => Err(Error::hub_exception(
                method,
                message.clone(),
                result.error_payload(),
            )),
            Some(message) => Err(Error::invocation_failure(method, message.clone())),
            None => Ok(result.payload()),
        });
        if !resolved {
            debug!(invocation_id = %id, "Result for settled invocation");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
