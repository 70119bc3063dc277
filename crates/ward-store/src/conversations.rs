use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use ward_core::ids::{ConversationId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub owner_id: UserId,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: String,
}

/// Result of a conditional create. The row is always the stored one, which
/// is the caller's only when `Created`.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    Created(ConversationRow),
    Existing(ConversationRow),
}

impl CreateOutcome {
    pub fn row(&self) -> &ConversationRow {
        match self {
            Self::Created(row) | Self::Existing(row) => row,
        }
    }

    pub fn into_row(self) -> ConversationRow {
        match self {
            Self::Created(row) | Self::Existing(row) => row,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

const SELECT_COLUMNS: &str = "SELECT id, owner_id, title, visibility, created_at FROM conversations";

#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the conversation unless one with this id already exists.
    ///
    /// First writer wins: concurrent callers racing on the same id all get
    /// back the winner's row.
    #[instrument(skip(self), fields(conversation_id = %id, owner = %owner))]
    pub fn create_if_absent(
        &self,
        id: &ConversationId,
        owner: &UserId,
        title: &str,
        visibility: Visibility,
    ) -> Result<CreateOutcome, StoreError> {
        let now = row_helpers::format_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversations (id, owner_id, title, visibility, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    owner.as_str(),
                    title,
                    visibility.to_string(),
                    now
                ],
            )?;

            let row = conn
                .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id.as_str()], |row| {
                    Ok(row_to_conversation(row))
                })??;

            if inserted == 1 {
                debug!("conversation created");
                Ok(CreateOutcome::Created(row))
            } else {
                Ok(CreateOutcome::Existing(row))
            }
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get_owner(&self, id: &ConversationId) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM conversations WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner.map(UserId::from_raw))
        })
    }

    /// Conversations owned by `owner`, newest first.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn list_by_owner(&self, owner: &UserId) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE owner_id = ?1 ORDER BY created_at DESC"
            ))?;
            let mut rows = stmt.query([owner.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn set_visibility(&self, id: &ConversationId, visibility: Visibility) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET visibility = ?1 WHERE id = ?2",
                rusqlite::params![visibility.to_string(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Delete a conversation and all of its messages in one transaction.
    /// Returns false when no such conversation existed.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn delete(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let messages = tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id.as_str()])?;
            let removed = tx.execute("DELETE FROM conversations WHERE id = ?1", [id.as_str()])?;
            tx.commit()?;
            debug!(messages, removed, "conversation deleted");
            Ok(removed == 1)
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let visibility: String = row_helpers::get(row, 3, "conversations", "visibility")?;
    Ok(ConversationRow {
        id: ConversationId::from_raw(row_helpers::get::<String>(row, 0, "conversations", "id")?),
        owner_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "conversations", "owner_id")?),
        title: row_helpers::get(row, 2, "conversations", "title")?,
        visibility: row_helpers::parse_enum(&visibility, "conversations", "visibility")?,
        created_at: row_helpers::get(row, 4, "conversations", "created_at")?,
    })
}
