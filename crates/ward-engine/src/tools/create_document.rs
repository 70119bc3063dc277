use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use ward_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use ward_store::documents::{DocumentKind, DocumentRepo};

use super::{progress, stream_content};

pub struct CreateDocumentTool {
    documents: DocumentRepo,
}

impl CreateDocumentTool {
    pub fn new(documents: DocumentRepo) -> Self {
        Self { documents }
    }
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    kind: DocumentKind,
    content: String,
}

#[async_trait]
impl Tool for CreateDocumentTool {
    fn name(&self) -> &str {
        "createDocument"
    }

    fn description(&self) -> &str {
        "Create a document for writing or content creation activities, such as notes, letters, care plans or code."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["title", "content"],
            "properties": {
                "title": { "type": "string" },
                "kind": { "type": "string", "enum": ["text", "code", "sheet"] },
                "content": { "type": "string", "description": "Full document body" }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let args: CreateArgs = ToolError::parse_args(args)?;
        let title = args.title.trim();
        if title.is_empty() {
            return Err(ToolError::InvalidArguments("title must not be empty".into()));
        }

        let doc = self
            .documents
            .create(
                &ctx.caller,
                Some(&ctx.conversation_id),
                title,
                args.kind,
                &args.content,
            )
            .map_err(|e| ToolError::ExecutionFailed(format!("could not save document: {e}")))?;
        info!(document_id = %doc.id, kind = %doc.kind, "document created");

        ctx.emit(progress("kind", doc.kind.to_string())).await?;
        ctx.emit(progress("id", doc.id.as_str())).await?;
        ctx.emit(progress("title", doc.title.as_str())).await?;
        ctx.emit(progress("clear", "")).await?;
        stream_content(ctx, &doc.content).await?;
        ctx.emit(progress("finish", "")).await?;

        Ok(ToolResult::ok(serde_json::json!({
            "id": doc.id,
            "title": doc.title,
            "kind": doc.kind,
            "content": "A document was created and is now visible to the user.",
        })))
    }
}
