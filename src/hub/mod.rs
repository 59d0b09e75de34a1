//! Hub proxies and invocations.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `invocation` | Correlation table and result handles |
//! | `proxy` | Per-hub handler registry and invoke API |

// ============================================================================
// Submodules
// ============================================================================

/// Correlation table and result handles.
pub mod invocation;

/// Per-hub handler registry and invoke API.
pub mod proxy;

// ============================================================================
// Re-exports
// ============================================================================

pub use invocation::{Invocation, InvocationResult};
pub use proxy::{Handler, HubProxy};

pub(crate) use invocation::PendingInvocations;
