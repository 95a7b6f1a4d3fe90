use super::protocol::ServerEvent;
use super::ConnectionRegistry;
use crate::auth::UserId;

/// Broadcast an event to every live connection, authenticated or not.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) {
    let Some(msg) = event.to_ws_message() else {
        return;
    };

    for sender in registry.senders() {
        let _ = sender.send(msg.clone());
    }
}

/// Send an event to a user's current connection.
///
/// The recipient is looked up at the moment of the call. Returns `false`
/// when the user is offline or their connection is already closing; the
/// event is dropped in that case (the store remains the source of truth).
pub fn send_to_user(registry: &ConnectionRegistry, user: &UserId, event: &ServerEvent) -> bool {
    let Some(handle) = registry.lookup(user) else {
        tracing::debug!(
            user_id = %user,
            event = event.name(),
            "Recipient offline, skipping real-time delivery"
        );
        return false;
    };

    let Some(msg) = event.to_ws_message() else {
        return false;
    };

    handle.sender.send(msg).is_ok()
}
