pub mod create_document;
pub mod get_weather;
pub mod update_document;

use std::sync::Arc;

use serde_json::{json, Value};
use ward_store::SqliteStore;

use crate::registry::ToolRegistry;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(store: &SqliteStore) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(get_weather::GetWeatherTool::new()));
    registry.register(Arc::new(create_document::CreateDocumentTool::new(
        store.documents.clone(),
    )));
    registry.register(Arc::new(update_document::UpdateDocumentTool::new(
        store.documents.clone(),
    )));
    registry
}

/// Document progress payload, as rendered by the client's document panel.
pub(crate) fn progress(kind: &str, content: impl Into<Value>) -> Value {
    json!({ "kind": kind, "content": content.into() })
}

/// Stream `content` as `text-delta` progress, one line at a time.
pub(crate) async fn stream_content(
    ctx: &ward_core::tools::ToolContext,
    content: &str,
) -> Result<(), ward_core::tools::ToolError> {
    for chunk in content.split_inclusive('\n') {
        ctx.emit(progress("text-delta", chunk)).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use ward_core::ids::{ConversationId, ToolCallId, UserId};
    use ward_core::tools::{ProgressSink, ToolContext, ToolError};

    #[derive(Default)]
    pub struct RecordingSink(pub Mutex<Vec<Value>>);

    impl RecordingSink {
        pub fn kinds(&self) -> Vec<String> {
            self.0
                .lock()
                .iter()
                .map(|p| p["kind"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, payload: Value) -> Result<(), ToolError> {
            self.0.lock().push(payload);
            Ok(())
        }
    }

    pub fn ctx(caller: &str, sink: Arc<RecordingSink>) -> ToolContext {
        ToolContext {
            conversation_id: ConversationId::from_raw("c1"),
            caller: UserId::from_raw(caller),
            tool_call_id: ToolCallId::from_raw("call_1"),
            abort_signal: CancellationToken::new(),
            progress: sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_store::Database;

    #[test]
    fn default_registry_has_builtin_tools() {
        let store = SqliteStore::new(Database::in_memory().unwrap());
        let registry = create_default_registry(&store);
        assert_eq!(
            registry.names(),
            vec!["createDocument", "getWeather", "updateDocument"]
        );
        for def in registry.definitions() {
            assert_eq!(def.parameters_schema["type"], "object", "{}", def.name);
            assert!(!def.description.is_empty());
        }
    }
}
