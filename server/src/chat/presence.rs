//! Presence broadcast on connection lifecycle.
//!
//! Every connect and disconnect publishes the full online-user list to all
//! live connections. The registry mutation, the snapshot, and the enqueue
//! onto each connection happen under the registry's lifecycle lock, so the
//! sequence of snapshots every client sees is the sequence of mutations.

use crate::auth::UserId;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionRegistry};

/// A connection finished its handshake. Registers `user` (if any) and
/// broadcasts the updated online list, including to the new connection.
pub fn connection_opened(
    registry: &ConnectionRegistry,
    handle: &ConnectionHandle,
    user: Option<&UserId>,
) {
    let _guard = registry.lifecycle_guard();

    registry.attach(handle);
    if let Some(user) = user {
        registry.register(user, handle.clone());
    }

    broadcast_online_users(registry);
}

/// A connection closed. Drops its presence entry unless a newer connection
/// for the same user already replaced it, then broadcasts to the rest.
pub fn connection_closed(registry: &ConnectionRegistry, handle: &ConnectionHandle, user: Option<&UserId>) {
    let _guard = registry.lifecycle_guard();

    registry.detach(handle.id);
    if let Some(user) = user {
        registry.unregister(user, handle.id);
    }

    broadcast_online_users(registry);
}

fn broadcast_online_users(registry: &ConnectionRegistry) {
    let online = registry.online_user_ids();
    tracing::debug!(
        online = online.len(),
        connections = registry.connection_count(),
        "Broadcasting online users"
    );
    broadcast_to_all(registry, &ServerEvent::GetOnlineUsers(online));
}
