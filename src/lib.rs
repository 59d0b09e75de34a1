//! Hub connection client - persistent real-time messaging over HTTP.
//!
//! This library keeps a long-lived connection to a hub server, invokes
//! server-side hub methods with correlated results, and delivers
//! server-pushed calls to registered handlers.
//!
//! # Architecture
//!
//! The client follows a negotiate-then-stream model:
//!
//! - **Negotiation**: one HTTP request yields a connection id and token
//! - **Transport**: long polling or server-sent events carries inbound frames;
//!   outbound invocations are posted to `/send`
//! - **Session loop**: one task per connection multiplexes frames, sends and
//!   keep-alive checks, and hands drops to the reconnection coordinator
//!
//! Key design principles:
//!
//! - Each [`HubConnection`] owns its session state; there is no global registry
//! - State transitions are serialized and emit ordered [`StatusEvent`]s
//! - Payloads are opaque JSON text ([`Payload`]); decoding is up to the caller
//! - Every invocation resolves exactly once
//!
//! # Quick Start
//!
//! ```no_run
//! use signalr_client::{ConnectionConfig, HubConnection, Payload, Result, events};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (observer, mut events) = events::channel();
//!     let config = ConnectionConfig::new("https://chat.example.com/signalr");
//!     let connection = HubConnection::new(config, observer)?;
//!
//!     let chat = connection.hub("chatHub");
//!     chat.on("chatMessage", |args| println!("message: {:?}", args.first()));
//!
//!     let id = connection.start().await?;
//!     println!("connected as {id}");
//!
//!     let reply = chat.invoke("Send", vec![Payload::from(r#""hello""#)])?.await?;
//!     println!("reply: {reply:?}");
//!
//!     connection.stop().await;
//!     while let Ok(event) = events.try_recv() {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Single-connection facade: [`Client`] |
//! | [`config`] | Connection configuration and reconnect policy |
//! | [`connection`] | [`HubConnection`] and its state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Status and message events, observers |
//! | [`hub`] | [`HubProxy`] handlers and [`Invocation`] handles |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | HTTP transports |

// ============================================================================
// Modules
// ============================================================================

/// Single-connection facade.
pub mod client;

/// Connection configuration.
///
/// Use [`ConnectionConfig::new`] and its `with_*` methods.
pub mod config;

/// Hub connection and lifecycle state.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Lifecycle and message events.
pub mod events;

/// Hub proxies and invocation handles.
pub mod hub;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol message types.
///
/// Mostly internal; [`Payload`] is the public argument and result type.
pub mod protocol;

/// HTTP transport layer.
///
/// Implement [`Transport`] to plug in a custom wire mechanism.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, Connector};

// Configuration types
pub use config::{ConnectionConfig, PendingPolicy, ReconnectPolicy, TransportKind, TransportMode};

// Connection types
pub use connection::{ConnectionState, HubConnection};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{
    ConnectionEvent, ConnectionObserver, ConnectionStatus, MessageEvent, NoopObserver,
    StatusEvent,
};

// Hub types
pub use hub::{Handler, HubProxy, Invocation, InvocationResult};

// Identifier types
pub use identifiers::{ConnectionId, InvocationId};

// Protocol types
pub use protocol::Payload;

// Transport types
pub use transport::{Transport, TransportEvent};
