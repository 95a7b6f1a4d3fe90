//! Persisted conversation/message store.
//!
//! `MessageStore` is the seam between the real-time core and durable state.
//! `SqliteMessageStore` is the production implementation; every call runs on
//! the blocking pool so the async runtime never waits on SQLite.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::auth::UserId;
use crate::db::models::{Conversation, LastMessage, Message, NewMessage};
use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("user {user} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        user: UserId,
        conversation_id: String,
    },

    #[error("a conversation needs two distinct participants")]
    InvalidParticipants,
}

/// Durable conversation/message operations consumed by the real-time core.
///
/// The two seen-flag updates are independent, monotonic (unseen -> seen)
/// writes; callers may repeat them freely.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Return the conversation between `a` and `b`, creating it if needed.
    async fn find_or_create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Conversation, StoreError>;

    async fn find_conversation_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn find_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Persist a message and point the conversation's last-message
    /// projection at it (unseen).
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Flip every unseen message of the conversation to seen.
    /// Returns the number of messages that changed.
    async fn update_many_messages_seen_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<u64, StoreError>;

    /// Flip the conversation's last-message projection to seen.
    /// Returns whether the conversation exists.
    async fn update_conversation_last_message_seen(
        &self,
        conversation_id: &str,
    ) -> Result<bool, StoreError>;

    /// Messages of a conversation in creation order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Conversations `user` takes part in, most recently updated first.
    async fn list_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError>;
}

/// SQLite-backed `MessageStore`.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *conn)
        })
        .await?
    }
}

const CONVERSATION_COLUMNS: &str = "id, participant_a, participant_b, last_message_text, \
     last_message_sender, last_message_seen, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, text, img, seen, created_at";

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        participants: [
            UserId::from(row.get::<_, String>(1)?),
            UserId::from(row.get::<_, String>(2)?),
        ],
        last_message: LastMessage {
            text: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            sender: row.get::<_, Option<String>>(4)?.map(UserId::from),
            seen: row.get(5)?,
        },
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: UserId::from(row.get::<_, String>(2)?),
        text: row.get(3)?,
        img: row.get(4)?,
        seen: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Normalize participant order: lexicographically smaller id is participant_a.
fn normalize_pair(a: &UserId, b: &UserId) -> Result<(String, String), StoreError> {
    if a == b {
        return Err(StoreError::InvalidParticipants);
    }
    if a < b {
        Ok((a.to_string(), b.to_string()))
    } else {
        Ok((b.to_string(), a.to_string()))
    }
}

fn select_conversation(
    conn: &Connection,
    participant_a: &str,
    participant_b: &str,
) -> Result<Option<Conversation>, StoreError> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
        CONVERSATION_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            rusqlite::params![participant_a, participant_b],
            conversation_from_row,
        )
        .optional()?)
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_or_create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Conversation, StoreError> {
        let (participant_a, participant_b) = normalize_pair(a, b)?;

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, participant_a, participant_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![
                    uuid::Uuid::now_v7().to_string(),
                    participant_a,
                    participant_b,
                    now
                ],
            )?;

            select_conversation(conn, &participant_a, &participant_b)?
                .ok_or(StoreError::ConversationNotFound(format!(
                    "{}/{}",
                    participant_a, participant_b
                )))
        })
        .await
    }

    async fn find_conversation_between(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<Conversation>, StoreError> {
        let (participant_a, participant_b) = match normalize_pair(a, b) {
            Ok(pair) => pair,
            Err(_) => return Ok(None),
        };

        self.with_conn(move |conn| select_conversation(conn, &participant_a, &participant_b))
            .await
    }

    async fn find_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
            Ok(conn
                .query_row(&sql, rusqlite::params![conversation_id], conversation_from_row)
                .optional()?)
        })
        .await
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let participants: Option<(String, String)> = tx
                .query_row(
                    "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
                    rusqlite::params![message.conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (participant_a, participant_b) = participants
                .ok_or_else(|| StoreError::ConversationNotFound(message.conversation_id.clone()))?;

            let sender = message.sender.as_str();
            if sender != participant_a && sender != participant_b {
                return Err(StoreError::NotParticipant {
                    user: message.sender.clone(),
                    conversation_id: message.conversation_id.clone(),
                });
            }

            let stored = Message {
                id: uuid::Uuid::now_v7().to_string(),
                conversation_id: message.conversation_id,
                sender: message.sender,
                text: message.text,
                img: message.img.filter(|key| !key.is_empty()),
                seen: false,
                created_at: Utc::now().to_rfc3339(),
            };

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender, text, img, seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![
                    stored.id,
                    stored.conversation_id,
                    stored.sender.as_str(),
                    stored.text,
                    stored.img,
                    stored.created_at
                ],
            )?;

            tx.execute(
                "UPDATE conversations
                 SET last_message_text = ?2, last_message_sender = ?3, last_message_seen = 0, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![
                    stored.conversation_id,
                    stored.text,
                    stored.sender.as_str(),
                    stored.created_at
                ],
            )?;

            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn update_many_messages_seen_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<u64, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET seen = 1 WHERE conversation_id = ?1 AND seen = 0",
                rusqlite::params![conversation_id],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn update_conversation_last_message_seen(
        &self,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let matched = conn.execute(
                "UPDATE conversations SET last_message_seen = 1 WHERE id = ?1",
                rusqlite::params![conversation_id],
            )?;
            Ok(matched > 0)
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY rowid ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(rusqlite::params![conversation_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn list_conversations(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY updated_at DESC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let conversations = stmt
                .query_map(rusqlite::params![user], conversation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn store() -> SqliteMessageStore {
        SqliteMessageStore::new(init_memory_db().unwrap())
    }

    fn new_message(conversation_id: &str, sender: &str, text: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender: UserId::new(sender),
            text: text.to_string(),
            img: None,
        }
    }

    #[tokio::test]
    async fn test_find_or_create_is_order_insensitive() {
        let store = store();
        let a = UserId::new("alice");
        let b = UserId::new("bob");

        let first = store.find_or_create_conversation(&b, &a).await.unwrap();
        let second = store.find_or_create_conversation(&a, &b).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.participants, [a.clone(), b.clone()]);
        assert_eq!(store.list_conversations(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_conversation_by_id() {
        let store = store();
        let conv = store
            .find_or_create_conversation(&UserId::new("alice"), &UserId::new("bob"))
            .await
            .unwrap();

        let found = store.find_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(found.participants, conv.participants);
        assert!(store.find_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_self_conversation_rejected() {
        let store = store();
        let a = UserId::new("alice");
        let result = store.find_or_create_conversation(&a, &a).await;
        assert!(matches!(result, Err(StoreError::InvalidParticipants)));
    }

    #[tokio::test]
    async fn test_create_message_updates_last_message() {
        let store = store();
        let a = UserId::new("alice");
        let b = UserId::new("bob");
        let conv = store.find_or_create_conversation(&a, &b).await.unwrap();

        store.create_message(new_message(&conv.id, "alice", "hi")).await.unwrap();
        let second = store
            .create_message(new_message(&conv.id, "bob", "hey there"))
            .await
            .unwrap();
        assert!(!second.seen);

        let conv = store.find_conversation_between(&a, &b).await.unwrap().unwrap();
        assert_eq!(conv.last_message.text, "hey there");
        assert_eq!(conv.last_message.sender, Some(b));
        assert!(!conv.last_message.seen);

        let texts: Vec<String> = store
            .list_messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["hi", "hey there"]);
    }

    #[tokio::test]
    async fn test_create_message_rejects_outsider() {
        let store = store();
        let conv = store
            .find_or_create_conversation(&UserId::new("alice"), &UserId::new("bob"))
            .await
            .unwrap();

        let result = store.create_message(new_message(&conv.id, "mallory", "x")).await;
        assert!(matches!(result, Err(StoreError::NotParticipant { .. })));

        let result = store.create_message(new_message("missing", "alice", "x")).await;
        assert!(matches!(result, Err(StoreError::ConversationNotFound(_))));
    }

    #[tokio::test]
    async fn test_seen_updates_are_monotonic() {
        let store = store();
        let conv = store
            .find_or_create_conversation(&UserId::new("alice"), &UserId::new("bob"))
            .await
            .unwrap();
        store.create_message(new_message(&conv.id, "alice", "1")).await.unwrap();
        store.create_message(new_message(&conv.id, "alice", "2")).await.unwrap();

        assert_eq!(
            store.update_many_messages_seen_by_conversation(&conv.id).await.unwrap(),
            2
        );
        assert_eq!(
            store.update_many_messages_seen_by_conversation(&conv.id).await.unwrap(),
            0
        );
        assert!(store.update_conversation_last_message_seen(&conv.id).await.unwrap());
        assert!(!store.update_conversation_last_message_seen("missing").await.unwrap());

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert!(messages.iter().all(|m| m.seen));
    }

    #[tokio::test]
    async fn test_empty_image_key_is_not_stored() {
        let store = store();
        let conv = store
            .find_or_create_conversation(&UserId::new("alice"), &UserId::new("bob"))
            .await
            .unwrap();
        let mut msg = new_message(&conv.id, "alice", "pic");
        msg.img = Some(String::new());
        let stored = store.create_message(msg).await.unwrap();
        assert_eq!(stored.img, None);
    }
}
