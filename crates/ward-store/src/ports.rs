use async_trait::async_trait;

use ward_core::ids::{ConversationId, PatientId, UserId};
use ward_core::messages::Message;

use crate::conversations::{ConversationRepo, CreateOutcome, Visibility};
use crate::database::Database;
use crate::documents::DocumentRepo;
use crate::error::StoreError;
use crate::messages::{AppendOutcome, MessageRepo};
use crate::patients::{PatientRepo, PatientRow};

/// The persistence contract the chat engine depends on.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create the conversation unless it exists. Losing a race is not an
    /// error: the outcome carries the winner's row.
    async fn create_if_absent(
        &self,
        id: &ConversationId,
        owner: &UserId,
        title: &str,
    ) -> Result<CreateOutcome, StoreError>;

    /// Idempotent on `message.id`.
    async fn append_message(&self, message: &Message) -> Result<AppendOutcome, StoreError>;

    async fn get_owner(&self, id: &ConversationId) -> Result<Option<UserId>, StoreError>;

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Remove the conversation and all its messages. False when missing.
    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError>;
}

/// Read-only lookup of the records used for context augmentation.
#[async_trait]
pub trait PatientSource: Send + Sync {
    async fn get_by_id(&self, id: &PatientId) -> Result<Option<PatientRow>, StoreError>;
}

/// SQLite-backed implementation of both contracts.
#[derive(Clone)]
pub struct SqliteStore {
    pub conversations: ConversationRepo,
    pub messages: MessageRepo,
    pub patients: PatientRepo,
    pub documents: DocumentRepo,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            patients: PatientRepo::new(db.clone()),
            documents: DocumentRepo::new(db),
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_if_absent(
        &self,
        id: &ConversationId,
        owner: &UserId,
        title: &str,
    ) -> Result<CreateOutcome, StoreError> {
        self.conversations
            .create_if_absent(id, owner, title, Visibility::Private)
    }

    async fn append_message(&self, message: &Message) -> Result<AppendOutcome, StoreError> {
        self.messages.append(message)
    }

    async fn get_owner(&self, id: &ConversationId) -> Result<Option<UserId>, StoreError> {
        self.conversations.get_owner(id)
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.messages.list(id)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.conversations.delete(id)
    }
}

#[async_trait]
impl PatientSource for SqliteStore {
    async fn get_by_id(&self, id: &PatientId) -> Result<Option<PatientRow>, StoreError> {
        self.patients.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use ward_core::ids::MessageId;
    use ward_core::messages::{Part, Role};

    #[tokio::test]
    async fn concurrent_create_through_port() {
        let store = Arc::new(SqliteStore::new(Database::in_memory().unwrap()));
        let id = ConversationId::from_raw("c-race");

        let mut set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            set.spawn(async move {
                store
                    .create_if_absent(&id, &UserId::from_raw(format!("u{i}")), "t")
                    .await
                    .unwrap()
            });
        }
        let mut created = 0;
        while let Some(outcome) = set.join_next().await {
            if outcome.unwrap().was_created() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn delete_through_port() {
        let store = SqliteStore::new(Database::in_memory().unwrap());
        let id = ConversationId::from_raw("c1");
        store.create_if_absent(&id, &UserId::from_raw("u1"), "t").await.unwrap();
        store
            .append_message(&Message {
                id: MessageId::new(),
                conversation_id: id.clone(),
                role: Role::User,
                parts: vec![Part::text("hi")],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.delete_conversation(&id).await.unwrap());
        assert!(store.get_owner(&id).await.unwrap().is_none());
        assert!(store.messages(&id).await.unwrap().is_empty());
    }
}
