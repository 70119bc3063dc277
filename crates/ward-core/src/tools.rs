use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ConversationId, ToolCallId, UserId};

/// Receives intermediate notifications from a running tool.
///
/// Emission suspends while the outbound stream is full and fails once the
/// receiver has gone away.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, payload: serde_json::Value) -> Result<(), ToolError>;
}

/// Context available to tools during execution.
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub caller: UserId,
    pub tool_call_id: ToolCallId,
    pub abort_signal: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

impl ToolContext {
    pub async fn emit(&self, payload: serde_json::Value) -> Result<(), ToolError> {
        if self.abort_signal.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        self.progress.emit(payload).await
    }
}

/// Result returned by a tool execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: serde_json::Value,
    pub is_error: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ToolResult {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            output,
            is_error: false,
            duration: Duration::ZERO,
        }
    }

    /// A failure the tool itself detected. The output is for the model.
    pub fn error(output: serde_json::Value) -> Self {
        Self {
            is_error: true,
            ..Self::ok(output)
        }
    }
}

/// Tool definition sent to the model as part of the context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Decode typed arguments, mapping failures to `InvalidArguments`.
    pub fn parse_args<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> Result<T, Self> {
        serde_json::from_value(args).map_err(|e| Self::InvalidArguments(e.to_string()))
    }
}

/// Serde helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<serde_json::Value>>);

    #[async_trait]
    impl ProgressSink for Collect {
        async fn emit(&self, payload: serde_json::Value) -> Result<(), ToolError> {
            self.0.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn ctx(sink: Arc<Collect>) -> ToolContext {
        ToolContext {
            conversation_id: ConversationId::from_raw("c1"),
            caller: UserId::from_raw("u1"),
            tool_call_id: ToolCallId::from_raw("call_1"),
            abort_signal: CancellationToken::new(),
            progress: sink,
        }
    }

    #[test]
    fn tool_result_duration_serializes_as_ms() {
        let result = ToolResult {
            output: serde_json::json!("ok"),
            is_error: false,
            duration: Duration::from_millis(1234),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1234);

        let parsed: ToolResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.duration, Duration::from_millis(1234));
    }

    #[tokio::test]
    async fn emit_forwards_to_sink() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let ctx = ctx(sink.clone());
        ctx.emit(serde_json::json!({"kind": "title"})).await.unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn emit_after_abort_is_cancelled() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let ctx = ctx(sink.clone());
        ctx.abort_signal.cancel();
        let err = ctx.emit(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn parse_args_maps_to_invalid_arguments() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            latitude: f64,
        }
        let err = ToolError::parse_args::<Args>(serde_json::json!({"latitude": "north"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::UnknownTool("nope".into());
        assert_eq!(err.to_string(), "unknown tool: nope");

        let err = ToolError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
