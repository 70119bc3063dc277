use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ward_core::ids::{ConversationId, DocumentId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Text,
    Code,
    Sheet,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Code => write!(f, "code"),
            Self::Sheet => write!(f, "sheet"),
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            "sheet" => Ok(Self::Sheet),
            other => Err(format!("unknown document kind: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRow {
    pub id: DocumentId,
    pub conversation_id: Option<ConversationId>,
    pub owner_id: UserId,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct DocumentRepo {
    db: Database,
}

impl DocumentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, content), fields(owner = %owner, kind = %kind))]
    pub fn create(
        &self,
        owner: &UserId,
        conversation_id: Option<&ConversationId>,
        title: &str,
        kind: DocumentKind,
        content: &str,
    ) -> Result<DocumentRow, StoreError> {
        let id = DocumentId::new();
        let now = row_helpers::format_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, conversation_id, owner_id, title, kind, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.as_str(),
                    conversation_id.map(|c| c.as_str()),
                    owner.as_str(),
                    title,
                    kind.to_string(),
                    content,
                    now,
                    now,
                ],
            )?;
            Ok(DocumentRow {
                id,
                conversation_id: conversation_id.cloned(),
                owner_id: owner.clone(),
                title: title.to_string(),
                kind,
                content: content.to_string(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(document_id = %id))]
    pub fn get(&self, id: &DocumentId) -> Result<Option<DocumentRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, owner_id, title, kind, content, created_at, updated_at
                 FROM documents WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_document(row).map(Some),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self, content), fields(document_id = %id))]
    pub fn update_content(&self, id: &DocumentId, content: &str) -> Result<(), StoreError> {
        let now = row_helpers::format_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE documents SET content = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![content, now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("document {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> Result<DocumentRow, StoreError> {
    let kind: String = row_helpers::get(row, 4, "documents", "kind")?;
    Ok(DocumentRow {
        id: DocumentId::from_raw(row_helpers::get::<String>(row, 0, "documents", "id")?),
        conversation_id: row_helpers::get_opt::<String>(row, 1, "documents", "conversation_id")?
            .map(ConversationId::from_raw),
        owner_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "documents", "owner_id")?),
        title: row_helpers::get(row, 3, "documents", "title")?,
        kind: row_helpers::parse_enum(&kind, "documents", "kind")?,
        content: row_helpers::get(row, 5, "documents", "content")?,
        created_at: row_helpers::get(row, 6, "documents", "created_at")?,
        updated_at: row_helpers::get(row, 7, "documents", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_update() {
        let repo = DocumentRepo::new(Database::in_memory().unwrap());
        let owner = UserId::from_raw("u1");
        let conv = ConversationId::from_raw("c1");
        let doc = repo
            .create(&owner, Some(&conv), "Care plan", DocumentKind::Text, "Draft")
            .unwrap();

        let fetched = repo.get(&doc.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Care plan");
        assert_eq!(fetched.conversation_id, Some(conv));

        repo.update_content(&doc.id, "Final").unwrap();
        assert_eq!(repo.get(&doc.id).unwrap().unwrap().content, "Final");
    }

    #[test]
    fn update_missing_is_not_found() {
        let repo = DocumentRepo::new(Database::in_memory().unwrap());
        let err = repo.update_content(&DocumentId::from_raw("nope"), "x").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn kind_parse() {
        assert_eq!("code".parse::<DocumentKind>().unwrap(), DocumentKind::Code);
        assert!("image".parse::<DocumentKind>().is_err());
    }
}
