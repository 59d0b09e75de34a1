//! Single-connection facade.
//!
//! [`Client`] is the surface an embedding layer drives: connect with a
//! configuration, invoke methods on the configured hub, register handlers
//! for pushed calls, and stop. It owns at most one [`HubConnection`]; a new
//! `connect` replaces the previous one.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use signalr_client::{Client, ConnectionConfig, NoopObserver, Payload, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::new(Arc::new(NoopObserver));
//! client.on("chatMessage", |args| println!("{} argument(s)", args.len()));
//!
//! let config = ConnectionConfig::new("https://chat.example.com/signalr").with_hub("chatHub");
//! let id = client.connect(config).await?;
//! println!("connected as {id}");
//!
//! let reply = client.invoke("Send", vec![Payload::from(r#""hello""#)]).await?;
//! println!("reply: {reply:?}");
//!
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, HubConnection};
use crate::error::{Error, Result};
use crate::events::ConnectionObserver;
use crate::hub::Handler;
use crate::identifiers::ConnectionId;
use crate::protocol::Payload;
use crate::transport::{self, Transport};

// ============================================================================
// Types
// ============================================================================

/// Builds the transports for a configuration.
pub type Connector =
    Arc<dyn Fn(&ConnectionConfig) -> Result<Vec<Arc<dyn Transport>>> + Send + Sync>;

// ============================================================================
// Client
// ============================================================================

/// Facade over one hub connection at a time.
///
/// Handlers registered with [`on`](Self::on) belong to the client and are
/// attached to the configured hub of every connection it creates.
pub struct Client {
    observer: Arc<dyn ConnectionObserver>,
    connector: Option<Connector>,
    handlers: Mutex<Vec<(String, Handler)>>,
    connection: Mutex<Option<HubConnection>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection", &*self.connection.lock())
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

impl Client {
    /// Creates a client reporting to `observer`.
    #[must_use]
    pub fn new(observer: Arc<dyn ConnectionObserver>) -> Self {
        Self {
            observer,
            connector: None,
            handlers: Mutex::new(Vec::new()),
            connection: Mutex::new(None),
        }
    }

    /// Replaces how transports are built for each connection.
    #[must_use]
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Returns the current connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<HubConnection> {
        self.connection.lock().clone()
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Connects with `config`, stopping any previous connection first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, or any error
    /// of [`HubConnection::start`].
    pub async fn connect(&self, config: ConnectionConfig) -> Result<ConnectionId> {
        config.validate()?;

        let previous = self.connection.lock().take();
        if let Some(previous) = previous {
            debug!("Replacing previous connection");
            previous.stop().await;
        }

        let transports = match &self.connector {
            Some(connector) => connector(&config)?,
            None => transport::for_config(&config)?,
        };
        let connection =
            HubConnection::with_transports(config, Arc::clone(&self.observer), transports)?;
        self.attach_handlers(&connection);
        *self.connection.lock() = Some(connection.clone());

        let id = connection.start().await?;
        info!(connection_id = %id, "Client connected");
        Ok(id)
    }

    /// Restarts the existing connection with its last configuration.
    ///
    /// Returns the current id if already connected.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if there is no prior connection, or it is
    ///   connecting or reconnecting
    /// - any error of [`HubConnection::start`]
    pub async fn reconnect(&self) -> Result<ConnectionId> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::not_ready("no connection to reconnect"))?;

        match connection.state() {
            ConnectionState::Connected => connection
                .connection_id()
                .ok_or_else(|| Error::not_ready("connection has no id")),
            state @ (ConnectionState::Connecting | ConnectionState::Reconnecting) => {
                Err(Error::not_ready(format!("connection is {state}")))
            }
            ConnectionState::Disconnected | ConnectionState::Error => connection.start().await,
        }
    }

    /// Stops the connection. Idempotent once a connection exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if there is no connection.
    pub async fn stop(&self) -> Result<()> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::not_ready("no connection to stop"))?;
        connection.stop().await;
        Ok(())
    }

    /// Returns `true` while the connection is `Connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(HubConnection::is_connected)
    }
}

// ============================================================================
// Client - Hub
// ============================================================================

impl Client {
    /// Invokes `method` on the configured hub and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if there is no connection, no configured hub,
    ///   or the connection is not `Connected`
    /// - any error the invocation resolves to
    pub async fn invoke(&self, method: &str, arguments: Vec<Payload>) -> Result<Option<Payload>> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::not_ready("hub not ready"))?;
        let hub = connection
            .config()
            .hub_name
            .as_deref()
            .map(|name| connection.hub(name))
            .ok_or_else(|| Error::not_ready("hub not ready"))?;

        hub.invoke(method, arguments)?.await
    }

    /// Registers a handler for server calls to `method` on the configured hub.
    ///
    /// Applies to the current connection and to every later one.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Payload]) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.handlers
            .lock()
            .push((method.to_owned(), Arc::clone(&handler)));

        if let Some(connection) = self.connection() {
            attach(&connection, method, handler);
        }
    }

    fn attach_handlers(&self, connection: &HubConnection) {
        let handlers = self.handlers.lock().clone();
        for (method, handler) in handlers {
            attach(connection, &method, handler);
        }
    }
}

fn attach(connection: &HubConnection, method: &str, handler: Handler) {
    match connection.config().hub_name.as_deref() {
        Some(name) => connection.hub(name).on(method, move |args| handler(args)),
        None => warn!(method, "No hub configured, handler not attached"),
    }
}

// ============================================================================
// Tests
// ============================================================================
