//! Persisted conversation and message types.
//! These correspond to the SQLite schema defined in migrations.rs and are
//! serialized in camelCase, which is what web clients read.

use serde::{Deserialize, Serialize};

use crate::auth::UserId;

/// Denormalized projection of the newest message in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender: Option<UserId>,
    pub seen: bool,
}

/// One-to-one conversation. Participants are stored in normalized order
/// (lexicographically smaller id first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: [UserId; 2],
    pub last_message: LastMessage,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participant that is not `user`, or `None` if `user` is not in
    /// this conversation.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        if !self.has_participant(user) {
            return None;
        }
        self.participants.iter().find(|p| *p != user)
    }
}

/// A message row. `img` is an opaque object-storage key, never a URL, when
/// it comes out of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub seen: bool,
    pub created_at: String,
}

/// Input for `MessageStore::create_message`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender: UserId,
    pub text: String,
    pub img: Option<String>,
}
