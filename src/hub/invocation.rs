//! Pending invocations and their result handles.
//!
//! Every outbound invocation owns one entry in [`PendingInvocations`] until
//! it resolves. Resolution removes the entry, so whichever of the server
//! result, the invocation timeout, or a connection failure arrives first is
//! the only one delivered.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, InvocationId};
use crate::protocol::Payload;

// ============================================================================
// Types
// ============================================================================

/// Outcome of an invocation: a value, a void result (`None`), or an error.
pub type InvocationResult = Result<Option<Payload>>;

struct PendingEntry {
    method: String,
    connection_id: Option<ConnectionId>,
    tx: oneshot::Sender<InvocationResult>,
    /// Timeout task; cancelled on resolution.
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn settle(self, result: InvocationResult) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        let _ = self.tx.send(result);
    }
}

// ============================================================================
// PendingInvocations
// ============================================================================

/// Correlation table of unanswered invocations.
#[derive(Default)]
pub(crate) struct PendingInvocations {
    entries: Mutex<FxHashMap<InvocationId, PendingEntry>>,
}

impl PendingInvocations {
    /// Registers an invocation sent on the session `connection_id`.
    pub(crate) fn register(
        &self,
        id: InvocationId,
        method: &str,
        connection_id: Option<ConnectionId>,
        tx: oneshot::Sender<InvocationResult>,
    ) {
        self.entries.lock().insert(
            id,
            PendingEntry {
                method: method.to_owned(),
                connection_id,
                tx,
                timer: None,
            },
        );
    }

    /// Attaches the timeout task of `id`.
    ///
    /// The task is aborted right away if `id` already resolved.
    pub(crate) fn set_timer(&self, id: InvocationId, timer: AbortHandle) {
        match self.entries.lock().get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Resolves `id` with the result built from its method name.
    ///
    /// Returns `false` if the invocation was already resolved.
    pub(crate) fn resolve(
        &self,
        id: InvocationId,
        result: impl FnOnce(&str) -> InvocationResult,
    ) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        let result = result(&entry.method);
        entry.settle(result);
        true
    }

    /// Fails every pending invocation. Returns how many were failed.
    pub(crate) fn fail_all(&self, error: &Error) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.settle(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, error = %error, "Failed pending invocations");
        }
        count
    }

    /// Fails the invocations whose session matches `predicate`.
    pub(crate) fn fail_where(
        &self,
        predicate: impl Fn(Option<&ConnectionId>) -> bool,
        error: &Error,
    ) -> usize {
        let failed: Vec<_> = {
            let mut entries = self.entries.lock();
            let ids: Vec<_> = entries
                .iter()
                .filter(|(_, entry)| predicate(entry.connection_id.as_ref()))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };
        let count = failed.len();
        for entry in failed {
            entry.settle(Err(error.clone()));
        }
        count
    }

    /// Returns the number of unanswered invocations.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// Handle to one outbound invocation; resolves to its result.
///
/// If the connection is torn down without resolving the invocation, the
/// handle resolves to [`Error::ConnectionClosed`].
#[derive(Debug)]
#[must_use = "an invocation result is lost unless the handle is awaited"]
pub struct Invocation {
    id: InvocationId,
    method: String,
    rx: oneshot::Receiver<InvocationResult>,
}

impl Invocation {
    pub(crate) fn new(
        id: InvocationId,
        method: impl Into<String>,
        rx: oneshot::Receiver<InvocationResult>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            rx,
        }
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Returns the invoked method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for Invocation {
    type Output = InvocationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::ConnectionClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq};

    fn pending_with(id: u64) -> (PendingInvocations, Invocation) {
        let pending = PendingInvocations::default();
        let (tx, rx) = oneshot::channel();
        let id = InvocationId::new(id);
        pending.register(id, "Send", ConnectionId::new("c1"), tx);
        (pending, Invocation::new(id, "Send", rx))
    }

    #[test]
    fn test_resolve_exactly_once() {
        let (pending, invocation) = pending_with(1);
        let mut handle = task::spawn(invocation);
        assert_pending!(handle.poll());

        assert!(pending.resolve(InvocationId::new(1), |_| Ok(Some(Payload::from("5")))));
        assert!(!pending.resolve(InvocationId::new(1), |_| Ok(None)));

        assert!(handle.is_woken());
        assert_ready_eq!(handle.poll(), Ok(Some(Payload::from("5"))));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_resolve_sees_method_name() {
        let (pending, invocation) = pending_with(2);
        let mut handle = task::spawn(invocation);

        pending.resolve(InvocationId::new(2), |method| {
            Err(Error::invocation_failure(method, "boom"))
        });

        let result = assert_ready!(handle.poll());
        assert_eq!(result, Err(Error::invocation_failure("Send", "boom")));
    }

    #[test]
    fn test_fail_all() {
        let (pending, invocation) = pending_with(3);
        let mut handle = task::spawn(invocation);

        assert_eq!(pending.fail_all(&Error::ConnectionClosed), 1);
        assert_ready_eq!(handle.poll(), Err(Error::ConnectionClosed));
    }

    #[test]
    fn test_fail_where_matches_session() {
        let pending = PendingInvocations::default();
        let (old_tx, old_rx) = oneshot::channel();
        let (new_tx, _new_rx) = oneshot::channel();
        pending.register(InvocationId::new(1), "a", ConnectionId::new("old"), old_tx);
        pending.register(InvocationId::new(2), "b", ConnectionId::new("new"), new_tx);

        let current = ConnectionId::new("new");
        let failed = pending.fail_where(
            |id| id != current.as_ref(),
            &Error::connection_lost("session replaced"),
        );

        assert_eq!(failed, 1);
        assert_eq!(pending.len(), 1);
        let mut old = task::spawn(Invocation::new(InvocationId::new(1), "a", old_rx));
        assert!(matches!(
            assert_ready!(old.poll()),
            Err(Error::ConnectionLost { .. })
        ));
    }

    #[test]
    fn test_dropped_sender_reads_as_closed() {
        let (tx, rx) = oneshot::channel::<InvocationResult>();
        drop(tx);
        let mut handle = task::spawn(Invocation::new(InvocationId::new(9), "m", rx));
        assert_ready_eq!(handle.poll(), Err(Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_resolution_cancels_timer() {
        let (pending, _invocation) = pending_with(4);
        let timer = tokio::spawn(tokio::time::sleep(std::time::Duration::from_secs(60)));
        pending.set_timer(InvocationId::new(4), timer.abort_handle());

        assert!(pending.resolve(InvocationId::new(4), |_| Ok(None)));
        let joined = tokio::time::timeout(std::time::Duration::from_secs(1), timer)
            .await
            .expect("timer ends");
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_fail_all_cancels_timers() {
        let (pending, _invocation) = pending_with(5);
        let timer = tokio::spawn(tokio::time::sleep(std::time::Duration::from_secs(60)));
        pending.set_timer(InvocationId::new(5), timer.abort_handle());

        pending.fail_all(&Error::ConnectionClosed);
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_timer_for_settled_invocation_is_cancelled() {
        let pending = PendingInvocations::default();
        let timer = tokio::spawn(tokio::time::sleep(std::time::Duration::from_secs(60)));
        pending.set_timer(InvocationId::new(6), timer.abort_handle());
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
