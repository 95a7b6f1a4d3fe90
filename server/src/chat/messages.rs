//! Direct-message send and history operations.
//!
//! These are the entry points the surrounding application calls after it has
//! authenticated the user. Persistence always happens before real-time
//! delivery, so a missed push never loses a message.

use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::db::models::{LastMessage, Message, NewMessage};
use crate::db::StoreError;
use crate::state::AppState;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::ServerEvent;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub recipient_id: UserId,
    #[serde(default)]
    pub text: String,
    /// Object-storage key of an already uploaded image
    #[serde(default)]
    pub img: Option<String>,
}

/// A conversation as listed for one user: the other party only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub participants: Vec<UserId>,
    pub last_message: LastMessage,
    pub updated_at: String,
}

/// Persist a message from `sender` and push `newMessage` to the recipient
/// if they are online. The pushed payload carries the stored image key as is.
pub async fn send_message(
    state: &AppState,
    sender: &UserId,
    request: SendMessage,
) -> Result<Message, StoreError> {
    let conversation = state
        .store
        .find_or_create_conversation(sender, &request.recipient_id)
        .await?;

    let message = state
        .store
        .create_message(NewMessage {
            conversation_id: conversation.id,
            sender: sender.clone(),
            text: request.text,
            img: request.img,
        })
        .await?;

    let delivered = send_to_user(
        &state.connections,
        &request.recipient_id,
        &ServerEvent::NewMessage(message.clone()),
    );

    tracing::debug!(
        user_id = %sender,
        recipient_id = %request.recipient_id,
        conversation_id = %message.conversation_id,
        delivered,
        "Message sent"
    );

    Ok(message)
}

/// Conversation history between `user` and `other`, oldest first, with image
/// keys expanded to signed URLs.
pub async fn get_messages(
    state: &AppState,
    user: &UserId,
    other: &UserId,
) -> Result<Vec<Message>, StoreError> {
    let conversation = state
        .store
        .find_conversation_between(user, other)
        .await?
        .ok_or_else(|| StoreError::ConversationNotFound(format!("{}/{}", user, other)))?;

    let mut messages = state.store.list_messages(&conversation.id).await?;

    if let Some(signer) = &state.media_signer {
        for message in &mut messages {
            if let Some(key) = message.img.take() {
                message.img = Some(signer.sign(&key));
            }
        }
    }

    Ok(messages)
}

/// Conversations `user` takes part in, most recent first.
pub async fn get_conversations(
    state: &AppState,
    user: &UserId,
) -> Result<Vec<ConversationSummary>, StoreError> {
    let conversations = state.store.list_conversations(user).await?;

    Ok(conversations
        .into_iter()
        .map(|conversation| ConversationSummary {
            participants: conversation.other_participant(user).cloned().into_iter().collect(),
            id: conversation.id,
            last_message: conversation.last_message,
            updated_at: conversation.updated_at,
        })
        .collect())
}
