//! Fixtures for connection tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{ConnectionConfig, ReconnectPolicy};
use crate::events::{ConnectionEvent, ConnectionStatus, StatusEvent, channel};
use crate::transport::Transport;

use super::HubConnection;

/// Reconnect policy with short delays and three attempts.
pub(crate) fn quick() -> ReconnectPolicy {
    ReconnectPolicy::default()
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(20))
        .with_max_attempts(Some(3))
}

pub(crate) fn config() -> ConnectionConfig {
    ConnectionConfig::new("https://x").with_reconnect(quick())
}

/// Builds a connection over `transports` with a channel observer.
pub(crate) fn connect(
    config: ConnectionConfig,
    transports: Vec<Arc<dyn Transport>>,
) -> (HubConnection, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (observer, events) = channel();
    let connection =
        HubConnection::with_transports(config, observer, transports).expect("valid connection");
    (connection, events)
}

/// Returns the next status event, skipping message events.
pub(crate) async fn next_status(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) -> StatusEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("status event in time")
            .expect("event stream open");
        if let ConnectionEvent::Status(status) = event {
            return status;
        }
    }
}

/// Asserts the next status events, in order.
pub(crate) async fn expect_statuses(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    expected: &[ConnectionStatus],
) {
    for status in expected {
        assert_eq!(next_status(events).await.status, *status);
    }
}
