//! In-memory connection table and presence registry.
//!
//! Two maps live here:
//! - `connections`: every live WebSocket, authenticated or not (broadcast targets)
//! - `presence`: user id -> the single connection currently representing that user
//!
//! Presence is last-connect-wins. Removal is conditional on the connection id,
//! so a late disconnect of a superseded connection never evicts its successor.
//! State is process-local and dropped on restart; clients re-register on reconnect.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ConnectionHandle, ConnectionId, ConnectionSender};
use crate::auth::UserId;

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionSender>>,
    presence: Arc<DashMap<UserId, ConnectionHandle>>,
    /// Serializes connect/disconnect transitions with the broadcast that follows them.
    lifecycle: Arc<Mutex<()>>,
}

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    ConnectionRegistry::default()
}

impl ConnectionRegistry {
    /// Add a live connection to the broadcast set.
    pub fn attach(&self, handle: &ConnectionHandle) {
        self.connections.insert(handle.id, handle.sender.clone());
    }

    /// Remove a connection from the broadcast set.
    pub fn detach(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Map `user` to `handle`, replacing any previous connection.
    /// Returns the replaced handle, if any.
    pub fn register(&self, user: &UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.presence.insert(user.clone(), handle);
        tracing::debug!(
            user_id = %user,
            replaced = previous.is_some(),
            "Presence registered"
        );
        previous
    }

    /// Remove `user`'s mapping only if it still belongs to `connection`.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, user: &UserId, connection: ConnectionId) -> bool {
        let removed = self
            .presence
            .remove_if(user, |_, handle| handle.id == connection)
            .is_some();
        tracing::debug!(
            user_id = %user,
            connection_id = %connection,
            removed,
            "Presence unregistered"
        );
        removed
    }

    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.presence.get(user).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.presence.contains_key(user)
    }

    /// Snapshot of the users currently present, sorted.
    pub fn online_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.presence.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of every live connection's sender.
    pub fn senders(&self) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Hold while mutating presence and emitting the resulting snapshot.
    /// Never held across an await.
    pub(crate) fn lifecycle_guard(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
