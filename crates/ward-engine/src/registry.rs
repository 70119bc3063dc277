use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{error, warn};

use ward_core::tools::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Registry of invocable tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces it.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolve a tool name at call time.
    pub fn validate(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Run one invocation to completion. Called at most once per tool call,
    /// never retried.
    ///
    /// Bounded by `timeout` and by the context's abort signal. A panicking
    /// tool fails its own invocation only.
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.validate(name)?;
        let start = Instant::now();
        let run = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();

        let outcome = tokio::select! {
            () = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
            outcome = tokio::time::timeout(timeout, run) => outcome,
        };

        match outcome {
            Ok(Ok(Ok(mut result))) => {
                result.duration = start.elapsed();
                Ok(result)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(tool = name, tool_call_id = %ctx.tool_call_id, panic = %msg, "tool panicked");
                Err(ToolError::ExecutionFailed(format!("tool panicked: {msg}")))
            }
            Err(_) => {
                warn!(tool = name, tool_call_id = %ctx.tool_call_id, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                Err(ToolError::Timeout(timeout))
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use ward_core::ids::{ConversationId, ToolCallId, UserId};
    use ward_core::tools::ProgressSink;

    struct DummyTool {
        name: String,
        behavior: Behavior,
    }

    enum Behavior {
        Echo,
        Sleep(Duration),
        Panic,
    }

    impl DummyTool {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                behavior,
            })
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            match self.behavior {
                Behavior::Echo => Ok(ToolResult::ok(args)),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ToolResult::ok(json!("late")))
                }
                Behavior::Panic => panic!("boom"),
            }
        }
    }

    struct NullSink;

    #[async_trait]
    impl ProgressSink for NullSink {
        async fn emit(&self, _payload: Value) -> Result<(), ToolError> {
            Ok(())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: ConversationId::from_raw("c1"),
            caller: UserId::from_raw("u1"),
            tool_call_id: ToolCallId::from_raw("call_1"),
            abort_signal: CancellationToken::new(),
            progress: Arc::new(NullSink),
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool::new("getWeather", Behavior::Echo));
        reg.register(DummyTool::new("createDocument", Behavior::Echo));

        assert_eq!(reg.count(), 2);
        assert!(reg.contains("getWeather"));
        assert!(reg.get("nope").is_none());
        assert_eq!(reg.names(), vec!["createDocument", "getWeather"]);
        let defs = reg.definitions();
        assert_eq!(defs[0].name, "createDocument");
    }

    #[test]
    fn validate_unknown_name() {
        let reg = ToolRegistry::new();
        assert!(matches!(reg.validate("rm_rf"), Err(ToolError::UnknownTool(name)) if name == "rm_rf"));
    }

    #[tokio::test]
    async fn dispatch_records_duration() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool::new("echo", Behavior::Echo));
        let result = reg
            .dispatch("echo", json!({"a": 1}), &ctx(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.output["a"], 1);
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn dispatch_times_out() {
        tokio::time::pause();
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool::new("slow", Behavior::Sleep(Duration::from_secs(60))));
        let err = reg
            .dispatch("slow", json!({}), &ctx(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn dispatch_contains_panics() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool::new("crash", Behavior::Panic));
        let err = reg
            .dispatch("crash", json!({}), &ctx(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn dispatch_observes_abort() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool::new("slow", Behavior::Sleep(Duration::from_secs(60))));
        let ctx = ctx();
        ctx.abort_signal.cancel();
        let err = reg
            .dispatch("slow", json!({}), &ctx, Duration::from_secs(120))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
