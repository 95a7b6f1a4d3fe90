//! Read-receipt propagation.
//!
//! A client viewing a conversation signals `markMessagesAsSeen`. Both seen
//! flags are flipped in the store, then the other participant is notified
//! with `messagesSeen` if they are online at that moment.

use crate::auth::UserId;
use crate::db::StoreError;
use crate::state::AppState;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::{MessagesSeen, ServerEvent};

/// Outcome of a successful mark-seen signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenOutcome {
    /// Messages that flipped from unseen to seen on this call.
    pub messages_updated: u64,
    /// Whether the other participant was online and got `messagesSeen`.
    pub notified: bool,
}

/// Mark every unseen message of `conversation_id` as seen on behalf of
/// `viewer`, then notify `recipient`.
///
/// `viewer` must be a participant of the conversation and `recipient` the
/// other one; otherwise nothing is written and nothing is sent. The two store
/// writes are independent and idempotent. If either fails the error is
/// logged and returned, and no receipt is sent. The recipient's connection is
/// looked up only after both writes complete.
pub async fn mark_messages_as_seen(
    state: &AppState,
    viewer: &UserId,
    conversation_id: &str,
    recipient: &UserId,
) -> Result<SeenOutcome, StoreError> {
    let conversation = match state.store.find_conversation(conversation_id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return Err(StoreError::ConversationNotFound(conversation_id.to_string())),
        Err(e) => {
            tracing::error!(
                user_id = %viewer,
                conversation_id = %conversation_id,
                error = %e,
                "Failed to load conversation for seen signal"
            );
            return Err(e);
        }
    };

    if conversation.other_participant(viewer) != Some(recipient) {
        tracing::warn!(
            user_id = %viewer,
            recipient_id = %recipient,
            conversation_id = %conversation_id,
            "Rejected seen signal for a conversation the pair does not share"
        );
        return Err(StoreError::NotParticipant {
            user: viewer.clone(),
            conversation_id: conversation_id.to_string(),
        });
    }

    let messages_updated = match state
        .store
        .update_many_messages_seen_by_conversation(conversation_id)
        .await
    {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(
                user_id = %viewer,
                conversation_id = %conversation_id,
                error = %e,
                "Failed to mark messages as seen"
            );
            return Err(e);
        }
    };

    if let Err(e) = state
        .store
        .update_conversation_last_message_seen(conversation_id)
        .await
    {
        tracing::error!(
            user_id = %viewer,
            conversation_id = %conversation_id,
            error = %e,
            "Failed to mark conversation last message as seen"
        );
        return Err(e);
    }

    let notified = send_to_user(
        &state.connections,
        recipient,
        &ServerEvent::MessagesSeen(MessagesSeen {
            conversation_id: conversation_id.to_string(),
        }),
    );

    tracing::debug!(
        user_id = %viewer,
        recipient_id = %recipient,
        conversation_id = %conversation_id,
        messages_updated,
        notified,
        "Messages marked as seen"
    );

    Ok(SeenOutcome {
        messages_updated,
        notified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Conversation, LastMessage, Message, NewMessage};
    use crate::db::{init_memory_db, MessageStore, SqliteMessageStore};
    use crate::state::Heartbeat;
    use crate::ws::{new_connection_registry, ConnectionHandle};
    use async_trait::async_trait;
    use axum::extract::ws::Message as WsMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn state_with(store: Arc<dyn MessageStore>) -> AppState {
        AppState {
            store,
            connections: new_connection_registry(),
            jwt_secret: vec![0u8; 32],
            require_token: false,
            heartbeat: Heartbeat::default(),
            media_signer: None,
        }
    }

    async fn seed(store: &SqliteMessageStore) -> Conversation {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let conv = store.find_or_create_conversation(&alice, &bob).await.unwrap();
        for text in ["one", "two"] {
            store
                .create_message(NewMessage {
                    conversation_id: conv.id.clone(),
                    sender: alice.clone(),
                    text: text.to_string(),
                    img: None,
                })
                .await
                .unwrap();
        }
        conv
    }

    #[tokio::test]
    async fn test_mark_seen_notifies_online_sender() {
        let store = Arc::new(SqliteMessageStore::new(init_memory_db().unwrap()));
        let conv = seed(&store).await;
        let state = state_with(store.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .connections
            .register(&UserId::new("alice"), ConnectionHandle::new(tx));

        let outcome = mark_messages_as_seen(&state, &UserId::new("bob"), &conv.id, &UserId::new("alice"))
            .await
            .unwrap();
        assert_eq!(outcome.messages_updated, 2);
        assert!(outcome.notified);

        match rx.try_recv().unwrap() {
            WsMessage::Text(text) => {
                let event: ServerEvent = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(
                    event,
                    ServerEvent::MessagesSeen(MessagesSeen {
                        conversation_id: conv.id.clone()
                    })
                );
            }
            other => panic!("Expected text frame, got {:?}", other),
        }

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert!(messages.iter().all(|m| m.seen));
        let conv = store
            .find_conversation_between(&UserId::new("alice"), &UserId::new("bob"))
            .await
            .unwrap()
            .unwrap();
        assert!(conv.last_message.seen);
    }

    #[tokio::test]
    async fn test_mark_seen_twice_is_idempotent() {
        let store = Arc::new(SqliteMessageStore::new(init_memory_db().unwrap()));
        let conv = seed(&store).await;
        let state = state_with(store.clone());

        let viewer = UserId::new("bob");
        let recipient = UserId::new("alice");
        let first = mark_messages_as_seen(&state, &viewer, &conv.id, &recipient).await.unwrap();
        let second = mark_messages_as_seen(&state, &viewer, &conv.id, &recipient).await.unwrap();

        assert_eq!(first.messages_updated, 2);
        assert_eq!(second.messages_updated, 0);
        assert!(store.list_messages(&conv.id).await.unwrap().iter().all(|m| m.seen));
    }

    #[tokio::test]
    async fn test_mark_seen_with_offline_recipient_is_silent() {
        let store = Arc::new(SqliteMessageStore::new(init_memory_db().unwrap()));
        let conv = seed(&store).await;
        let state = state_with(store);

        let outcome = mark_messages_as_seen(&state, &UserId::new("bob"), &conv.id, &UserId::new("alice"))
            .await
            .unwrap();
        assert!(!outcome.notified);
    }

    #[tokio::test]
    async fn test_outsider_cannot_mark_seen() {
        let store = Arc::new(SqliteMessageStore::new(init_memory_db().unwrap()));
        let conv = seed(&store).await;
        let state = state_with(store.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .connections
            .register(&UserId::new("alice"), ConnectionHandle::new(tx));

        let result =
            mark_messages_as_seen(&state, &UserId::new("mallory"), &conv.id, &UserId::new("alice")).await;
        assert!(matches!(result, Err(StoreError::NotParticipant { .. })));

        // Participant naming someone outside the conversation as recipient.
        let result =
            mark_messages_as_seen(&state, &UserId::new("bob"), &conv.id, &UserId::new("carol")).await;
        assert!(matches!(result, Err(StoreError::NotParticipant { .. })));

        assert!(rx.try_recv().is_err());
        assert!(store.list_messages(&conv.id).await.unwrap().iter().all(|m| !m.seen));
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_rejected() {
        let store = Arc::new(SqliteMessageStore::new(init_memory_db().unwrap()));
        let state = state_with(store);

        let result =
            mark_messages_as_seen(&state, &UserId::new("bob"), "missing", &UserId::new("alice")).await;
        assert!(matches!(result, Err(StoreError::ConversationNotFound(_))));
    }

    /// Store over a single alice/bob conversation whose seen-updates fail.
    /// The message update fails only when `fail_messages` is set; the
    /// conversation update always fails.
    struct BrokenStore {
        fail_messages: bool,
        calls: AtomicUsize,
    }

    impl BrokenStore {
        fn new(fail_messages: bool) -> Self {
            Self {
                fail_messages,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn find_or_create_conversation(
            &self,
            _a: &UserId,
            _b: &UserId,
        ) -> Result<Conversation, StoreError> {
            Err(StoreError::LockPoisoned)
        }

        async fn find_conversation_between(
            &self,
            _a: &UserId,
            _b: &UserId,
        ) -> Result<Option<Conversation>, StoreError> {
            Ok(None)
        }

        async fn find_conversation(
            &self,
            conversation_id: &str,
        ) -> Result<Option<Conversation>, StoreError> {
            Ok(Some(Conversation {
                id: conversation_id.to_string(),
                participants: [UserId::new("alice"), UserId::new("bob")],
                last_message: LastMessage::default(),
                created_at: String::new(),
                updated_at: String::new(),
            }))
        }

        async fn create_message(&self, _message: NewMessage) -> Result<Message, StoreError> {
            Err(StoreError::LockPoisoned)
        }

        async fn update_many_messages_seen_by_conversation(
            &self,
            _conversation_id: &str,
        ) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_messages {
                Err(StoreError::LockPoisoned)
            } else {
                Ok(2)
            }
        }

        async fn update_conversation_last_message_seen(
            &self,
            _conversation_id: &str,
        ) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::LockPoisoned)
        }

        async fn list_messages(&self, _conversation_id: &str) -> Result<Vec<Message>, StoreError> {
            Ok(vec![])
        }

        async fn list_conversations(&self, _user: &UserId) -> Result<Vec<Conversation>, StoreError> {
            Ok(vec![])
        }
    }

    async fn mark_seen_against(store: Arc<BrokenStore>) -> (Result<SeenOutcome, StoreError>, bool) {
        let state = state_with(store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .connections
            .register(&UserId::new("alice"), ConnectionHandle::new(tx));

        let result =
            mark_messages_as_seen(&state, &UserId::new("bob"), "c1", &UserId::new("alice")).await;
        (result, rx.try_recv().is_ok())
    }

    #[tokio::test]
    async fn test_message_update_failure_sends_no_receipt() {
        let store = Arc::new(BrokenStore::new(true));
        let (result, received) = mark_seen_against(store.clone()).await;

        assert!(result.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(!received);
    }

    #[tokio::test]
    async fn test_conversation_update_failure_sends_no_receipt() {
        let store = Arc::new(BrokenStore::new(false));
        let (result, received) = mark_seen_against(store.clone()).await;

        assert!(result.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert!(!received);
    }
}
