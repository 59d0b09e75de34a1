//! Per-hub facade over a connection.
//!
//! A [`HubProxy`] keeps the client-side handlers registered for one hub and
//! sends invocations to its server-side methods. Handlers belong to the
//! proxy, not to a transport, so they stay registered across reconnects.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::connection::Shared;
use crate::error::{Error, Result};
use crate::identifiers::InvocationId;
use crate::protocol::Payload;

use super::invocation::{Invocation, InvocationResult};

// ============================================================================
// Types
// ============================================================================

/// Client-side handler for a server-pushed call.
pub type Handler = Arc<dyn Fn(&[Payload]) + Send + Sync>;

struct ProxyInner {
    name: String,
    handlers: RwLock<FxHashMap<String, Vec<Handler>>>,
    connection: Weak<Shared>,
}

// ============================================================================
// HubProxy
// ============================================================================

/// Handle to one named hub of a connection.
///
/// Cloning is cheap; clones share the handler table.
#[derive(Clone)]
pub struct HubProxy {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for HubProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubProxy")
            .field("name", &self.inner.name)
            .field("methods", &self.inner.handlers.read().len())
            .finish()
    }
}

impl HubProxy {
    pub(crate) fn new(name: impl Into<String>, connection: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                name: name.into(),
                handlers: RwLock::new(FxHashMap::default()),
                connection,
            }),
        }
    }

    /// Returns the hub name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

// ============================================================================
// HubProxy - Handlers
// ============================================================================

impl HubProxy {
    /// Registers a handler for server calls to `method`.
    ///
    /// Method names match case-insensitively. Every handler registered for
    /// a name fires, in registration order.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Payload]) + Send + Sync + 'static,
    {
        debug!(hub = %self.inner.name, method, "Registering handler");
        self.inner
            .handlers
            .write()
            .entry(method.to_lowercase())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Removes every handler for `method`. Returns how many were removed.
    pub fn off(&self, method: &str) -> usize {
        self.inner
            .handlers
            .write()
            .remove(&method.to_lowercase())
            .map_or(0, |handlers| handlers.len())
    }

    /// Returns how many handlers are registered for `method`.
    #[must_use]
    pub fn handler_count(&self, method: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(&method.to_lowercase())
            .map_or(0, Vec::len)
    }

    /// Returns the handlers for `method`, in registration order.
    pub(crate) fn handlers_for(&self, method: &str) -> Vec<Handler> {
        self.inner
            .handlers
            .read()
            .get(&method.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================================================
// HubProxy - Invocation
// ============================================================================

impl HubProxy {
    /// Invokes a server-side hub method.
    ///
    /// The call is queued for sending immediately; the returned handle
    /// resolves with the correlated result.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if the connection is not `Connected`
    /// - [`Error::InvalidArgument`] if an argument is not JSON text
    /// - [`Error::ConnectionClosed`] if the connection no longer exists
    pub fn invoke(&self, method: &str, arguments: Vec<Payload>) -> Result<Invocation> {
        let connection = self
            .inner
            .connection
            .upgrade()
            .ok_or(Error::ConnectionClosed)?;
        connection.invoke(&self.inner.name, method, &arguments)
    }

    /// Invokes a server-side hub method and reports the result to `callback`.
    ///
    /// The callback runs on a Tokio task once the invocation resolves.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke); on error the callback is not called.
    pub fn invoke_with<F>(
        &self,
        method: &str,
        arguments: Vec<Payload>,
        callback: F,
    ) -> Result<InvocationId>
    where
        F: FnOnce(InvocationResult) + Send + 'static,
    {
        let invocation = self.invoke(method, arguments)?;
        let id = invocation.id();
        tokio::spawn(async move {
            let result = invocation.await;
            if let Err(e) = &result {
                warn!(invocation_id = %id, error = %e, "Invocation failed");
            }
            callback(result);
        });
        Ok(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
