//! Connection configuration.
//!
//! Use [`ConnectionConfig::new`] and the chained `with_*` methods to describe
//! where and how to connect.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use signalr_client::{ConnectionConfig, ReconnectPolicy, TransportMode};
//!
//! let config = ConnectionConfig::new("https://example.com/signalr")
//!     .with_transport(TransportMode::Auto)
//!     .with_query("token", "abc")
//!     .with_header("X-Client", "mobile")
//!     .with_hub("chatHub")
//!     .with_hub_method("chatMessage")
//!     .with_reconnect(ReconnectPolicy::default().with_base_delay(Duration::from_millis(500)));
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `options` | Connection target, transport mode and hub options |
//! | `reconnect` | Reconnect policy and backoff |

// ============================================================================
// Submodules
// ============================================================================

/// Connection target, transport mode and hub options.
pub mod options;

/// Reconnect policy and backoff.
pub mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use options::{ConnectionConfig, TransportKind, TransportMode};
pub use reconnect::{PendingPolicy, ReconnectPolicy};
