use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use ward_core::ids::DocumentId;
use ward_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use ward_store::documents::DocumentRepo;

use super::{progress, stream_content};

pub struct UpdateDocumentTool {
    documents: DocumentRepo,
}

impl UpdateDocumentTool {
    pub fn new(documents: DocumentRepo) -> Self {
        Self { documents }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    id: DocumentId,
    content: String,
}

#[async_trait]
impl Tool for UpdateDocumentTool {
    fn name(&self) -> &str {
        "updateDocument"
    }

    fn description(&self) -> &str {
        "Replace the content of a document you created earlier."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["id", "content"],
            "properties": {
                "id": { "type": "string", "description": "Id of the document to update" },
                "content": { "type": "string", "description": "New document body" }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let args: UpdateArgs = ToolError::parse_args(args)?;

        let existing = self
            .documents
            .get(&args.id)
            .map_err(|e| ToolError::ExecutionFailed(format!("could not load document: {e}")))?;
        // Foreign documents look exactly like missing ones.
        let doc = match existing {
            Some(doc) if doc.owner_id == ctx.caller => doc,
            Some(_) => {
                warn!(target: "ward::security", document_id = %args.id, caller = %ctx.caller, "update of a document owned by another user");
                return Err(ToolError::ExecutionFailed("document not found".into()));
            }
            None => return Err(ToolError::ExecutionFailed("document not found".into())),
        };

        ctx.emit(progress("clear", "")).await?;
        stream_content(ctx, &args.content).await?;
        self.documents
            .update_content(&doc.id, &args.content)
            .map_err(|e| ToolError::ExecutionFailed(format!("could not save document: {e}")))?;
        ctx.emit(progress("finish", "")).await?;
        info!(document_id = %doc.id, "document updated");

        Ok(ToolResult::ok(serde_json::json!({
            "id": doc.id,
            "title": doc.title,
            "kind": doc.kind,
            "content": "The document has been updated successfully.",
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{ctx, RecordingSink};
    use serde_json::json;
    use std::sync::Arc;
    use ward_core::ids::{ConversationId, UserId};
    use ward_store::documents::DocumentKind;
    use ward_store::Database;

    fn seeded() -> (UpdateDocumentTool, DocumentRepo, DocumentId) {
        let repo = DocumentRepo::new(Database::in_memory().unwrap());
        let doc = repo
            .create(
                &UserId::from_raw("u1"),
                Some(&ConversationId::from_raw("c1")),
                "Letter",
                DocumentKind::Text,
                "Dear Dr. Smith",
            )
            .unwrap();
        (UpdateDocumentTool::new(repo.clone()), repo, doc.id)
    }

    #[tokio::test]
    async fn owner_can_update() {
        let (tool, repo, id) = seeded();
        let sink = Arc::new(RecordingSink::default());
        let result = tool
            .execute(json!({"id": id, "content": "Dear Dr. Jones"}), &ctx("u1", sink.clone()))
            .await
            .unwrap();

        assert_eq!(result.output["title"], "Letter");
        assert_eq!(sink.kinds(), vec!["clear", "text-delta", "finish"]);
        assert_eq!(repo.get(&id).unwrap().unwrap().content, "Dear Dr. Jones");
    }

    #[tokio::test]
    async fn foreign_document_is_indistinguishable_from_missing() {
        let (tool, repo, id) = seeded();
        let sink = Arc::new(RecordingSink::default());

        let foreign = tool
            .execute(json!({"id": id, "content": "hijack"}), &ctx("u2", sink.clone()))
            .await
            .unwrap_err();
        let missing = tool
            .execute(json!({"id": "doc_missing", "content": "x"}), &ctx("u1", sink.clone()))
            .await
            .unwrap_err();

        assert_eq!(foreign.to_string(), missing.to_string());
        assert!(sink.kinds().is_empty());
        assert_eq!(repo.get(&id).unwrap().unwrap().content, "Dear Dr. Smith");
    }
}
