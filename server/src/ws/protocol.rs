//! JSON event protocol spoken over the WebSocket.
//!
//! Every frame is a text frame `{"event": <name>, "data": <payload>}`.
//! Event names are fixed by the web client and must not change.

use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::chat::seen;
use crate::db::models::Message;
use crate::state::AppState;

/// Server -> client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers(Vec<UserId>),
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    #[serde(rename = "messagesSeen")]
    MessagesSeen(MessagesSeen),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesSeen {
    pub conversation_id: String,
}

/// Client -> server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "markMessagesAsSeen")]
    MarkMessagesAsSeen(MarkMessagesAsSeen),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessagesAsSeen {
    pub conversation_id: String,
    /// The other participant, who gets the read receipt.
    pub recipient_id: UserId,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetOnlineUsers(_) => "getOnlineUsers",
            Self::NewMessage(_) => "newMessage",
            Self::MessagesSeen(_) => "messagesSeen",
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_ws_message(&self) -> Option<axum::extract::ws::Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(axum::extract::ws::Message::Text(json.into())),
            Err(e) => {
                tracing::error!(event = self.name(), error = %e, "Failed to encode event");
                None
            }
        }
    }
}

/// Handle an incoming text frame from a connection.
/// Malformed and unknown events are dropped; no error is sent back.
pub async fn handle_text_message(text: &str, state: &AppState, user: Option<&UserId>) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                user_id = ?user,
                error = %e,
                "Ignoring unrecognized client event"
            );
            return;
        }
    };

    match event {
        ClientEvent::MarkMessagesAsSeen(signal) => {
            let Some(user) = user else {
                tracing::debug!(
                    conversation_id = %signal.conversation_id,
                    "Ignoring markMessagesAsSeen from unauthenticated connection"
                );
                return;
            };
            // Failures are logged inside; the client gets no acknowledgment.
            let _ = seen::mark_messages_as_seen(
                state,
                user,
                &signal.conversation_id,
                &signal.recipient_id,
            )
            .await;
        }
    }
}
