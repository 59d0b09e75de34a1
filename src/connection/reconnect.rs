//! Reconnection after a transport drop.
//!
//! The coordinator first tries to resume the same session on the same
//! transport, then falls back to a fresh negotiation. Attempts are spaced by
//! the policy's backoff and bounded by its attempt count and elapsed time.
//! Exhaustion moves the connection to `Error`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::config::PendingPolicy;
use crate::error::{Error, Result};
use crate::transport::cancelled;

use super::core::Shared;
use super::session::{Link, close_link};
use super::state::ConnectionState;

// ============================================================================
// Recovery
// ============================================================================

/// How a drop was taken over.
enum Entry {
    /// The session was stopped or restarted meanwhile.
    Stale,
    Disabled,
    Reconnecting,
}

/// Recovers a dropped link.
///
/// Returns the replacement link once the connection is `Connected` again,
/// or `None` if it was stopped or ended in `Error`.
pub(crate) async fn recover(
    shared: &Arc<Shared>,
    epoch: u64,
    link: Link,
    shutdown: &mut watch::Receiver<bool>,
    reason: Option<String>,
) -> Option<Link> {
    link.cancel();
    let reason = reason.unwrap_or_else(|| "transport closed".to_owned());
    let policy = shared.config.reconnect.clone();

    let entry = {
        let mut slot = shared.session.lock();
        if slot.epoch != epoch || slot.state != ConnectionState::Connected {
            Entry::Stale
        } else if !policy.enabled {
            Entry::Disabled
        } else {
            warn!(reason = %reason, "Connection lost, reconnecting");
            shared.transition(&mut slot, ConnectionState::Reconnecting, Some(reason.clone()));
            Entry::Reconnecting
        }
    };

    match entry {
        Entry::Stale => {
            close_link(link).await;
            return None;
        }
        Entry::Disabled => {
            warn!(reason = %reason, "Connection lost, reconnect disabled");
            fail(shared, epoch, link, Error::connection_lost(reason)).await;
            return None;
        }
        Entry::Reconnecting => {}
    }

    if policy.pending == PendingPolicy::FailOnDrop {
        shared
            .pending
            .fail_all(&Error::connection_lost(reason.clone()));
    }

    let started = Instant::now();
    let deadline = policy.max_elapsed.map(|max| started + max);
    let resumable_until = started + link.session.negotiation().resume_window();
    let mut attempts = 0u32;
    let mut last_error = Error::connection_lost(reason);

    while policy.allows(attempts, started.elapsed()) {
        let mut delay = policy.delay_for(attempts);
        if let Some(deadline) = deadline {
            delay = delay.min(deadline.saturating_duration_since(Instant::now()));
        }

        let waited = tokio::select! {
            biased;
            _ = cancelled(shutdown) => false,
            () = sleep(delay) => true,
        };
        if !waited {
            close_link(link).await;
            return None;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        attempts += 1;
        let same_session = Instant::now() < resumable_until;
        debug!(attempt = attempts, same_session, "Reconnect attempt");

        let attempt = async {
            let Some(deadline) = deadline else {
                return resume(shared, &link, same_session).await;
            };
            timeout_at(deadline, resume(shared, &link, same_session))
                .await
                .unwrap_or_else(|_| {
                    let budget = deadline.saturating_duration_since(started);
                    Err(Error::timeout("reconnect attempt", budget.as_millis() as u64))
                })
        };
        let resumed = tokio::select! {
            biased;
            _ = cancelled(shutdown) => None,
            resumed = attempt => Some(resumed),
        };
        let Some(resumed) = resumed else {
            close_link(link).await;
            return None;
        };

        match resumed {
            Ok(next) => {
                let replaced = !Arc::ptr_eq(&next.session, &link.session);
                if !reactivate(shared, epoch, &next) {
                    close_link(next).await;
                    close_link(link).await;
                    return None;
                }
                if replaced {
                    tokio::spawn(close_link(link));
                }
                return Some(next);
            }
            Err(e) => {
                warn!(attempt = attempts, error = %e, "Reconnect attempt failed");
                last_error = e;
            }
        }
    }

    let error = Error::connection_lost(format!(
        "reconnect failed after {attempts} attempts: {last_error}"
    ));
    fail(shared, epoch, link, error).await;
    None
}

/// Reopens the receive channel of the same session, or starts a new one.
///
/// With `same_session` unset the server has already discarded the session,
/// so only a fresh negotiation can succeed.
async fn resume(shared: &Shared, link: &Link, same_session: bool) -> Result<Link> {
    if !same_session {
        debug!("Session past its disconnect timeout, renegotiating");
        return shared.establish().await;
    }

    let limit = shared.open_timeout(link.session.negotiation());
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let reopened = timeout(
        limit,
        link.transport.reconnect(Arc::clone(&link.session), cancel_rx),
    )
    .await;
    match reopened {
        Ok(Ok(frames)) => {
            return Ok(Link {
                transport: Arc::clone(&link.transport),
                session: Arc::clone(&link.session),
                frames,
                cancel: cancel_tx,
            });
        }
        Ok(Err(e)) => debug!(error = %e, "Session resume failed, renegotiating"),
        Err(_) => debug!("Session resume timed out, renegotiating"),
    }

    shared.establish().await
}

/// Marks the connection `Connected` on the recovered link.
///
/// Invocations sent on a session other than the recovered one can no longer
/// be answered and fail with [`Error::ConnectionLost`].
fn reactivate(shared: &Shared, epoch: u64, link: &Link) -> bool {
    let mut slot = shared.session.lock();
    if slot.epoch != epoch || slot.state != ConnectionState::Reconnecting {
        return false;
    }

    let id = link.session.connection_id().clone();
    if slot.connection_id.as_ref() != Some(&id) {
        let failed = shared.pending.fail_where(
            |owner| owner != Some(&id),
            &Error::connection_lost("session replaced"),
        );
        info!(connection_id = %id, failed, "Reconnected with a new session");
        slot.connection_id = Some(id);
    } else {
        info!(connection_id = %id, "Session resumed");
    }

    slot.transport = Some(link.transport.kind());
    shared.transition(&mut slot, ConnectionState::Connected, None);
    true
}

/// Ends the session in `Error`.
async fn fail(shared: &Shared, epoch: u64, link: Link, error: Error) {
    {
        let mut slot = shared.session.lock();
        if slot.epoch == epoch && !slot.state.is_terminal() {
            warn!(error = %error, "Connection failed");
            slot.last_error = Some(error.clone());
            slot.outbound = None;
            slot.transport = None;
            slot.shutdown = None;
            shared.transition(&mut slot, ConnectionState::Error, Some(error.to_string()));
        }
    }
    shared.pending.fail_all(&error);
    close_link(link).await;
}

// ============================================================================
// Tests
// ============================================================================
