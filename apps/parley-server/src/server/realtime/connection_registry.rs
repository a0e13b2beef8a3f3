use std::collections::{HashMap, HashSet};

use parley_core::UserId;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::server::{
    core::{ConnectionControl, CLOSE_POLICY_VIOLATION},
    metrics::{
        record_gateway_event_dropped, record_gateway_event_emitted,
        record_gateway_event_oversized_outbound,
    },
};

/// Transport-side handles for one live connection.
pub(crate) struct ConnectionHandle {
    pub(crate) outbound: mpsc::Sender<String>,
    pub(crate) control: watch::Sender<ConnectionControl>,
}

struct ConnectionEntry {
    user_id: UserId,
    handle: ConnectionHandle,
}

#[derive(Default)]
struct RegistryMaps {
    connections: HashMap<Uuid, ConnectionEntry>,
    // Never holds an empty set.
    user_connections: HashMap<UserId, HashSet<Uuid>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pub(crate) connection_id: Uuid,
    pub(crate) first_connection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deregistration {
    pub(crate) user_id: UserId,
    pub(crate) was_last_connection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    /// Connection is gone or no longer writable.
    Stale,
    /// Outbound queue was full; the connection has been told to close.
    SlowConsumer,
    /// Payload could not be produced or exceeds the outbound limit.
    Dropped,
}

/// Live connections and the per-user index over them.
///
/// Both maps sit behind one lock, so register and deregister of the same
/// user never interleave and first/last transitions are reported exactly
/// once.
pub(crate) struct ConnectionRegistry {
    maps: Mutex<RegistryMaps>,
    max_payload_bytes: usize,
}

impl ConnectionRegistry {
    pub(crate) fn new(max_payload_bytes: usize) -> Self {
        Self {
            maps: Mutex::new(RegistryMaps::default()),
            max_payload_bytes,
        }
    }

    #[cfg(test)]
    pub(crate) async fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Registration {
        self.register_notifying(user_id, handle, |_| {}).await
    }

    /// Registers and, on the user's first connection, runs `on_first` before
    /// the lock is released so transitions are observed in registry order.
    pub(crate) async fn register_notifying(
        &self,
        user_id: UserId,
        handle: ConnectionHandle,
        on_first: impl FnOnce(UserId),
    ) -> Registration {
        let mut maps = self.maps.lock().await;
        let mut connection_id = Uuid::new_v4();
        while maps.connections.contains_key(&connection_id) {
            connection_id = Uuid::new_v4();
        }
        maps.connections.insert(connection_id, ConnectionEntry { user_id, handle });
        let user_set = maps.user_connections.entry(user_id).or_default();
        user_set.insert(connection_id);
        let first_connection = user_set.len() == 1;
        if first_connection {
            on_first(user_id);
        }
        Registration {
            connection_id,
            first_connection,
        }
    }

    /// Returns `None` when the connection was already removed.
    #[cfg(test)]
    pub(crate) async fn deregister(&self, connection_id: Uuid) -> Option<Deregistration> {
        self.deregister_notifying(connection_id, |_| {}).await
    }

    /// Deregisters and, when it was the user's last connection, runs
    /// `on_last` before the lock is released.
    pub(crate) async fn deregister_notifying(
        &self,
        connection_id: Uuid,
        on_last: impl FnOnce(UserId),
    ) -> Option<Deregistration> {
        let mut maps = self.maps.lock().await;
        let entry = maps.connections.remove(&connection_id)?;
        let user_id = entry.user_id;
        let was_last_connection = match maps.user_connections.get_mut(&user_id) {
            Some(user_set) => {
                user_set.remove(&connection_id);
                user_set.is_empty()
            }
            None => true,
        };
        if was_last_connection {
            maps.user_connections.remove(&user_id);
            on_last(user_id);
        }
        Some(Deregistration {
            user_id,
            was_last_connection,
        })
    }

    pub(crate) async fn connections_of(&self, user_id: UserId) -> Vec<Uuid> {
        self.maps
            .lock()
            .await
            .user_connections
            .get(&user_id)
            .map(|user_set| user_set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) async fn connection_count(&self) -> usize {
        self.maps.lock().await.connections.len()
    }

    /// Enqueues an already serialized payload. Never fails the caller.
    pub(crate) async fn deliver(
        &self,
        connection_id: Uuid,
        payload: &str,
        event_type: &str,
        scope: &'static str,
    ) -> DeliveryOutcome {
        if payload.len() > self.max_payload_bytes {
            record_gateway_event_oversized_outbound(scope, event_type);
            return DeliveryOutcome::Dropped;
        }

        let maps = self.maps.lock().await;
        let Some(entry) = maps.connections.get(&connection_id) else {
            record_gateway_event_dropped(scope, event_type, "stale");
            return DeliveryOutcome::Stale;
        };
        if *entry.handle.control.borrow() != ConnectionControl::Open {
            record_gateway_event_dropped(scope, event_type, "closing");
            return DeliveryOutcome::Stale;
        }

        match entry.handle.outbound.try_send(payload.to_owned()) {
            Ok(()) => {
                record_gateway_event_emitted(scope, event_type);
                DeliveryOutcome::Delivered
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_gateway_event_dropped(scope, event_type, "closed");
                DeliveryOutcome::Stale
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_gateway_event_dropped(scope, event_type, "full_queue");
                let _ = entry.handle.control.send(ConnectionControl::Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "slow_consumer",
                });
                DeliveryOutcome::SlowConsumer
            }
        }
    }

    /// Asks the connection's writer to send a close frame.
    pub(crate) async fn request_close(&self, connection_id: Uuid, code: u16, reason: &'static str) {
        if let Some(entry) = self.maps.lock().await.connections.get(&connection_id) {
            let _ = entry
                .handle
                .control
                .send(ConnectionControl::Close { code, reason });
        }
    }
}
