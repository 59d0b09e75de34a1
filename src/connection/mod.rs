//! Hub connection lifecycle.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`HubConnection`] handle and shared session state |
//! | `reconnect` | Recovery after a transport drop |
//! | `session` | Per-session frame, send and keep-alive loop |
//! | `state` | [`ConnectionState`] machine states |

// ============================================================================
// Submodules
// ============================================================================

mod core;
mod reconnect;
mod session;

/// Connection lifecycle states.
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::HubConnection;
pub use state::ConnectionState;

pub(crate) use self::core::Shared;
