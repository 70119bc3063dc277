use tracing::{debug, instrument};

use ward_core::ids::{ConversationId, MessageId};
use ward_core::messages::{Message, Part, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// A message with this id was already stored; nothing was written.
    AlreadyPresent,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Idempotent on the message id: replaying the same
    /// message leaves the stored copy untouched.
    #[instrument(skip(self, message), fields(message_id = %message.id, conversation_id = %message.conversation_id))]
    pub fn append(&self, message: &Message) -> Result<AppendOutcome, StoreError> {
        let parts = serde_json::to_string(&message.parts)?;
        let created_at = row_helpers::format_timestamp(&message.created_at);
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO messages (id, conversation_id, role, parts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.role.to_string(),
                    parts,
                    created_at,
                ],
            )?;
            if inserted == 1 {
                Ok(AppendOutcome::Inserted)
            } else {
                debug!("message already present");
                Ok(AppendOutcome::AlreadyPresent)
            }
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, parts, created_at FROM messages WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Messages of a conversation in creation order.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, parts, created_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([conversation_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let role: String = row_helpers::get(row, 2, "messages", "role")?;
    let parts: String = row_helpers::get(row, 3, "messages", "parts")?;
    let created_at: String = row_helpers::get(row, 4, "messages", "created_at")?;
    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        role: row_helpers::parse_enum::<Role>(&role, "messages", "role")?,
        parts: row_helpers::parse_json::<Vec<Part>>(&parts, "messages", "parts")?,
        created_at: row_helpers::parse_timestamp(&created_at, "messages", "created_at")?,
    })
}
