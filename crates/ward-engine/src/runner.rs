use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use ward_core::context::LlmContext;
use ward_core::errors::GatewayError;
use ward_core::events::{EventSource, StreamEvent};
use ward_core::ids::{ConversationId, MessageId, PatientId, ToolCallId, TurnId, UserId};
use ward_core::messages::{
    most_recent_user_message, InvocationState, Message, Part, Role, ToolInvocation, TurnMessage,
};
use ward_core::provider::{LlmProvider, ModelStream, StreamOptions};
use ward_core::stream::{ModelEvent, ToolCallRequest};
use ward_core::tools::{ToolContext, ToolError, ToolResult};
use ward_llm::models::find_model;
use ward_store::{ConversationStore, PatientSource};

use crate::context::{ContextFragment, ContextResolver};
use crate::error::EngineError;
use crate::mux::{Multiplexer, SourceHandle, TurnStream, GENERIC_ERROR};
use crate::prompts;
use crate::registry::ToolRegistry;
use crate::smooth::WordSmoother;

const TITLE_LIMIT: usize = 80;
const DEFAULT_TITLE: &str = "New chat";

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Ceiling on model steps per turn. Each tool round trip is one step.
    pub max_steps: u32,
    /// Wall-clock deadline for the whole turn.
    pub max_turn_duration: Duration,
    pub tool_timeout: Duration,
    /// Capacity of the outbound event channel.
    pub channel_capacity: usize,
    pub smoothing: bool,
    /// Caps the model variant's own output limit.
    pub max_tokens: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            max_turn_duration: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            channel_capacity: 64,
            smoothing: true,
            max_tokens: None,
        }
    }
}

/// One inbound chat turn.
#[derive(Clone, Debug)]
pub struct Turn {
    pub conversation_id: ConversationId,
    pub caller: UserId,
    pub messages: Vec<TurnMessage>,
    pub model: String,
    pub patient_id: Option<PatientId>,
    pub title: Option<String>,
}

/// How a started turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The assistant message was persisted under this id.
    Completed(MessageId),
    /// Client went away or the engine shut down. No assistant message.
    Aborted,
    DeadlineExceeded,
    /// The model failed or produced nothing. No assistant message.
    Failed,
    /// The stream completed but the assistant message could not be stored.
    PersistenceFailed,
}

pub struct TurnHandle {
    pub turn_id: TurnId,
    pub events: TurnStream,
    pub completion: JoinHandle<TurnOutcome>,
}

/// The streaming orchestrator.
pub struct ChatEngine {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn ConversationStore>,
    resolver: ContextResolver,
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
    active: Arc<DashMap<TurnId, CancellationToken>>,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn ConversationStore>,
        patients: Arc<dyn PatientSource>,
        registry: Arc<ToolRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            resolver: ContextResolver::new(patients),
            registry,
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and persist the user turn, then start streaming.
    ///
    /// Every rejection happens before the first write. Once this returns
    /// `Ok`, the user message is durable and the turn runs on its own task.
    #[instrument(skip_all, fields(conversation_id = %turn.conversation_id, caller = %turn.caller))]
    pub async fn start_turn(&self, turn: Turn) -> Result<TurnHandle, EngineError> {
        let deadline = Instant::now() + self.config.max_turn_duration;
        let model = find_model(&turn.model)
            .ok_or_else(|| EngineError::Validation(format!("unknown model: {}", turn.model)))?;
        if turn.conversation_id.is_blank() {
            return Err(EngineError::Validation("conversation id is required".into()));
        }
        let user_message = most_recent_user_message(&turn.messages)
            .cloned()
            .ok_or_else(|| EngineError::Validation("No user message found".into()))?;

        tokio::time::timeout_at(deadline, self.persist_user_turn(&turn, user_message))
            .await
            .map_err(|_| EngineError::Deadline(self.config.max_turn_duration))??;

        let fragment = match tokio::time::timeout_at(
            deadline,
            self.resolver.resolve(turn.patient_id.as_ref(), &turn.caller),
        )
        .await
        {
            Ok(fragment) => fragment,
            Err(_) => {
                warn!("patient lookup outlived the turn deadline, continuing without context");
                ContextFragment::empty()
            }
        };
        let mut context = LlmContext {
            system: prompts::system_prompt(&fragment, model.tools_enabled),
            messages: Vec::with_capacity(turn.messages.len()),
            tools: if model.tools_enabled {
                self.registry.definitions()
            } else {
                Vec::new()
            },
        };
        for message in turn.messages {
            context.push(message.role, message.parts);
        }
        let options = StreamOptions {
            model: model.api_model.to_string(),
            max_tokens: Some(
                self.config
                    .max_tokens
                    .map_or(model.max_output, |cap| cap.min(model.max_output)),
            ),
            thinking: model.thinking(),
        };

        let turn_id = TurnId::new();
        let cancel = CancellationToken::new();
        self.active.insert(turn_id.clone(), cancel.clone());
        let registration = ActiveTurn {
            turn_id: turn_id.clone(),
            active: Arc::clone(&self.active),
        };

        let (mux, events) = Multiplexer::channel(self.config.channel_capacity, cancel.clone());
        let driver = TurnDriver {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            conversation_id: turn.conversation_id.clone(),
            caller: turn.caller,
            context,
            options,
            model_source: mux.source(EventSource::Model),
            mux,
            tool_cancel: cancel.child_token(),
            cancel,
            deadline,
            tools: JoinSet::new(),
            settled: Vec::new(),
            draft: Vec::new(),
        };

        let span = info_span!("turn", turn_id = %turn_id, conversation_id = %turn.conversation_id);
        let completion = tokio::spawn(
            async move {
                let _registration = registration;
                driver.run().await
            }
            .instrument(span),
        );
        debug!(turn_id = %turn_id, model = model.id, "turn started");

        Ok(TurnHandle {
            turn_id,
            events,
            completion,
        })
    }

    /// Ownership check, conversation creation and the user message append.
    /// Nothing is written when the conversation belongs to someone else.
    async fn persist_user_turn(
        &self,
        turn: &Turn,
        user_message: TurnMessage,
    ) -> Result<(), EngineError> {
        match self.store.get_owner(&turn.conversation_id).await? {
            Some(owner) if owner != turn.caller => {
                warn!(target: "ward::security", "turn for a conversation owned by another user");
                return Err(EngineError::Unauthorized);
            }
            Some(_) => {}
            None => {
                let title = turn
                    .title
                    .as_deref()
                    .and_then(first_line)
                    .unwrap_or_else(|| derive_title(&user_message));
                let created = self
                    .store
                    .create_if_absent(&turn.conversation_id, &turn.caller, &title)
                    .await?;
                if created.row().owner_id != turn.caller {
                    warn!(target: "ward::security", "conversation was created concurrently by another user");
                    return Err(EngineError::Unauthorized);
                }
                if created.was_created() {
                    info!(title = %title, "conversation created");
                }
            }
        }

        self.store
            .append_message(&user_message.into_message(turn.conversation_id.clone()))
            .await?;
        Ok(())
    }

    /// Persisted messages of a conversation the caller owns, oldest first.
    pub async fn history(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, EngineError> {
        self.authorize(caller, conversation_id).await?;
        Ok(self.store.messages(conversation_id).await?)
    }

    /// Owner-only removal of a conversation and all of its messages.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, caller = %caller))]
    pub async fn delete_conversation(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<(), EngineError> {
        self.authorize(caller, conversation_id).await?;
        if !self.store.delete_conversation(conversation_id).await? {
            return Err(EngineError::NotFound(format!("conversation {conversation_id}")));
        }
        info!("conversation deleted");
        Ok(())
    }

    async fn authorize(
        &self,
        caller: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<(), EngineError> {
        match self.store.get_owner(conversation_id).await? {
            None => Err(EngineError::NotFound(format!("conversation {conversation_id}"))),
            Some(owner) if owner != *caller => {
                warn!(
                    target: "ward::security",
                    caller = %caller,
                    conversation_id = %conversation_id,
                    "access to a conversation owned by another user"
                );
                Err(EngineError::Unauthorized)
            }
            Some(_) => Ok(()),
        }
    }

    pub fn active_turns(&self) -> usize {
        self.active.len()
    }

    /// Cancel one in-flight turn. False when it already finished.
    pub fn abort(&self, turn_id: &TurnId) -> bool {
        match self.active.get(turn_id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight turn. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            entry.value().cancel();
            count += 1;
        }
        if count > 0 {
            info!(count, "aborting in-flight turns");
        }
        count
    }
}

/// Removes a turn from the active set when its task ends, however it ends.
struct ActiveTurn {
    turn_id: TurnId,
    active: Arc<DashMap<TurnId, CancellationToken>>,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.active.remove(&self.turn_id);
    }
}

enum StepsEnd {
    Finished,
    ModelFailed(GatewayError),
    Aborted,
    Deadline,
}

struct ToolOutcome {
    tool_call_id: ToolCallId,
    result: Result<ToolResult, ToolError>,
}

/// Per-turn state, owned by the turn's task.
struct TurnDriver {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn ConversationStore>,
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
    conversation_id: ConversationId,
    caller: UserId,
    context: LlmContext,
    options: StreamOptions,
    mux: Multiplexer,
    model_source: SourceHandle,
    cancel: CancellationToken,
    tool_cancel: CancellationToken,
    /// Fixed when the turn request arrived, so setup time counts against it.
    deadline: Instant,
    tools: JoinSet<ToolOutcome>,
    /// Invocations that failed validation and never ran.
    settled: Vec<ToolOutcome>,
    /// Assistant parts accumulated across all steps.
    draft: Vec<Part>,
}

impl TurnDriver {
    async fn run(mut self) -> TurnOutcome {
        let cancel = self.cancel.clone();
        let deadline = self.deadline;
        let end = tokio::select! {
            biased;
            () = cancel.cancelled() => StepsEnd::Aborted,
            () = tokio::time::sleep_until(deadline) => StepsEnd::Deadline,
            end = self.drive() => end,
        };
        self.finalize(end).await
    }

    async fn drive(&mut self) -> StepsEnd {
        let max_steps = self.config.max_steps.max(1);
        for step in 1..=max_steps {
            let mut parts = Vec::new();
            let called = match self.run_step(step, &mut parts).await {
                Ok(called) => called,
                Err(end) => return end,
            };
            let results = self.join_tools(&mut parts).await;
            parts.extend(results);
            self.draft.extend(parts.iter().cloned());
            self.context.push(Role::Assistant, parts);

            if !called {
                return StepsEnd::Finished;
            }
            if step == max_steps {
                warn!(max_steps, "step ceiling reached while the model still called tools");
            }
        }
        StepsEnd::Finished
    }

    /// Stream one model step. Returns whether any tool was called.
    async fn run_step(&mut self, step: u32, parts: &mut Vec<Part>) -> Result<bool, StepsEnd> {
        let mut stream: ModelStream = self
            .provider
            .stream(&self.context, &self.options)
            .await
            .map_err(StepsEnd::ModelFailed)?;
        let mut smoother = WordSmoother::new(self.config.smoothing);
        let mut called = false;

        while let Some(event) = stream.next().await {
            match event {
                ModelEvent::TextDelta { delta } => {
                    push_text(parts, &delta);
                    for chunk in smoother.push(&delta) {
                        emit(&self.model_source, StreamEvent::TextDelta { delta: chunk }).await?;
                    }
                }
                ModelEvent::ReasoningDelta { delta } => {
                    flush_text(&self.model_source, &mut smoother).await?;
                    push_reasoning(parts, &delta);
                    emit(&self.model_source, StreamEvent::ReasoningDelta { delta }).await?;
                }
                ModelEvent::ToolCall(call) => {
                    flush_text(&self.model_source, &mut smoother).await?;
                    emit(&self.model_source, StreamEvent::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await?;
                    let invocation = self.start_tool(call).await?;
                    parts.push(Part::ToolInvocation(invocation));
                    called = true;
                }
                ModelEvent::Finish { stop_reason } => {
                    debug!(step, ?stop_reason, "model step finished");
                    break;
                }
                ModelEvent::Error { error } => {
                    let _ = flush_text(&self.model_source, &mut smoother).await;
                    return Err(StepsEnd::ModelFailed(error));
                }
            }
        }

        flush_text(&self.model_source, &mut smoother).await?;
        Ok(called)
    }

    /// Validate the call and, if the tool exists, run it on its own task.
    async fn start_tool(&mut self, call: ToolCallRequest) -> Result<ToolInvocation, StepsEnd> {
        let mut invocation =
            ToolInvocation::requested(call.id.clone(), &call.name, call.arguments.clone());
        let source = self.mux.source(EventSource::Tool {
            tool_call_id: call.id.clone(),
        });

        if let Err(e) = self.registry.validate(&call.name) {
            warn!(tool = %call.name, tool_call_id = %call.id, "model called an unknown tool");
            invocation.advance(InvocationState::Failed);
            source
                .emit(StreamEvent::Error {
                    message: scoped_error(&call.name, &e),
                })
                .await
                .map_err(|_| StepsEnd::Aborted)?;
            self.settled.push(ToolOutcome {
                tool_call_id: call.id,
                result: Err(e),
            });
            return Ok(invocation);
        }

        invocation.advance(InvocationState::Running);
        let registry = Arc::clone(&self.registry);
        let timeout = self.config.tool_timeout;
        let ctx = ToolContext {
            conversation_id: self.conversation_id.clone(),
            caller: self.caller.clone(),
            tool_call_id: call.id.clone(),
            abort_signal: self.tool_cancel.clone(),
            progress: Arc::new(source.clone()),
        };

        self.tools.spawn(
            async move {
                let result = registry
                    .dispatch(&call.name, call.arguments, &ctx, timeout)
                    .await;
                let event = match &result {
                    // The detailed payload goes to the model only.
                    Ok(r) if r.is_error => {
                        warn!(tool = %call.name, tool_call_id = %call.id, "tool returned an error result");
                        StreamEvent::Error {
                            message: format!("{} failed", call.name),
                        }
                    }
                    Ok(r) => StreamEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        result: r.output.clone(),
                        is_error: false,
                    },
                    Err(e) => {
                        warn!(tool = %call.name, tool_call_id = %call.id, error = %e, "tool invocation failed");
                        StreamEvent::Error {
                            message: scoped_error(&call.name, e),
                        }
                    }
                };
                if source.emit(event).await.is_err() {
                    debug!(tool_call_id = %call.id, "receiver gone before tool result");
                }
                ToolOutcome {
                    tool_call_id: call.id,
                    result,
                }
            }
            .in_current_span(),
        );
        Ok(invocation)
    }

    /// Wait for this step's tools, settle their invocation states, and
    /// return the result parts in call order.
    async fn join_tools(&mut self, parts: &mut [Part]) -> Vec<Part> {
        let mut outcomes: HashMap<ToolCallId, Result<ToolResult, ToolError>> = self
            .settled
            .drain(..)
            .map(|o| (o.tool_call_id, o.result))
            .collect();
        while let Some(joined) = self.tools.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.tool_call_id, outcome.result);
                }
                Err(e) => error!(error = %e, "tool task did not complete"),
            }
        }

        let mut results = Vec::new();
        for part in parts.iter_mut() {
            let Part::ToolInvocation(invocation) = part else {
                continue;
            };
            let (state, result, is_error) = match outcomes.remove(&invocation.tool_call_id) {
                Some(Ok(r)) if !r.is_error => (InvocationState::Completed, r.output, false),
                Some(Ok(r)) => (InvocationState::Failed, r.output, true),
                Some(Err(e)) => (
                    InvocationState::Failed,
                    serde_json::json!({ "error": e.to_string() }),
                    true,
                ),
                None => (
                    InvocationState::Failed,
                    serde_json::json!({ "error": "tool did not complete" }),
                    true,
                ),
            };
            invocation.advance(state);
            results.push(Part::ToolResult {
                tool_call_id: invocation.tool_call_id.clone(),
                tool_name: invocation.tool_name.clone(),
                result,
                is_error,
            });
        }
        results
    }

    async fn finalize(mut self, end: StepsEnd) -> TurnOutcome {
        self.tool_cancel.cancel();
        self.tools.abort_all();
        while self.tools.join_next().await.is_some() {}

        let TurnDriver {
            store,
            conversation_id,
            mux,
            model_source,
            draft,
            config,
            ..
        } = self;

        match end {
            StepsEnd::Finished if !has_content(&draft) => {
                error!("model finished without producing assistant content");
                let _ = mux.turn_error(GENERIC_ERROR).await;
                let _ = mux.finish().await;
                TurnOutcome::Failed
            }
            StepsEnd::Finished => {
                drop(model_source);
                let _ = mux.finish().await;
                persist_assistant(store.as_ref(), conversation_id, draft).await
            }
            StepsEnd::ModelFailed(error) => {
                warn!(error = %error, kind = error.error_kind(), "model stream failed");
                let _ = model_source
                    .emit(StreamEvent::Error {
                        message: GENERIC_ERROR.into(),
                    })
                    .await;
                let _ = mux.finish().await;
                TurnOutcome::Failed
            }
            StepsEnd::Deadline => {
                warn!(
                    deadline_ms = config.max_turn_duration.as_millis() as u64,
                    "turn deadline exceeded"
                );
                let _ = mux.turn_error(GENERIC_ERROR).await;
                let _ = mux.finish().await;
                TurnOutcome::DeadlineExceeded
            }
            StepsEnd::Aborted => {
                info!("turn aborted");
                let _ = mux.finish().await;
                TurnOutcome::Aborted
            }
        }
    }
}

async fn emit(source: &SourceHandle, event: StreamEvent) -> Result<(), StepsEnd> {
    source.emit(event).await.map_err(|_| StepsEnd::Aborted)
}

async fn flush_text(source: &SourceHandle, smoother: &mut WordSmoother) -> Result<(), StepsEnd> {
    match smoother.flush() {
        Some(delta) => emit(source, StreamEvent::TextDelta { delta }).await,
        None => Ok(()),
    }
}

/// Runs after `done`, so a failure here cannot reach the client.
async fn persist_assistant(
    store: &dyn ConversationStore,
    conversation_id: ConversationId,
    parts: Vec<Part>,
) -> TurnOutcome {
    let message = Message {
        id: MessageId::new(),
        conversation_id,
        role: Role::Assistant,
        parts,
        created_at: Utc::now(),
    };
    match store.append_message(&message).await {
        Ok(_) => {
            info!(message_id = %message.id, parts = message.parts.len(), "assistant message persisted");
            TurnOutcome::Completed(message.id)
        }
        Err(error) => {
            error!(message_id = %message.id, error = %error, "failed to persist assistant message");
            TurnOutcome::PersistenceFailed
        }
    }
}

/// The client-facing text of a tool-scoped error.
fn scoped_error(tool: &str, error: &ToolError) -> String {
    match error {
        ToolError::Timeout(_) => format!("{tool} timed out"),
        ToolError::UnknownTool(_) => format!("{tool} is not an available tool"),
        ToolError::InvalidArguments(_) => format!("{tool} was called with invalid arguments"),
        ToolError::Cancelled => format!("{tool} was cancelled"),
        ToolError::ExecutionFailed(_) => format!("{tool} failed"),
    }
}

fn push_text(parts: &mut Vec<Part>, delta: &str) {
    if let Some(Part::Text { text }) = parts.last_mut() {
        text.push_str(delta);
    } else if !delta.is_empty() {
        parts.push(Part::text(delta));
    }
}

fn push_reasoning(parts: &mut Vec<Part>, delta: &str) {
    if let Some(Part::Reasoning { text }) = parts.last_mut() {
        text.push_str(delta);
    } else if !delta.is_empty() {
        parts.push(Part::Reasoning { text: delta.to_string() });
    }
}

fn has_content(parts: &[Part]) -> bool {
    parts.iter().any(|p| match p {
        Part::Text { text } | Part::Reasoning { text } => !text.trim().is_empty(),
        Part::ToolInvocation(_) => true,
        _ => false,
    })
}

fn first_line(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(TITLE_LIMIT).collect())
}

fn derive_title(message: &TurnMessage) -> String {
    first_line(&message.text_content()).unwrap_or_else(|| DEFAULT_TITLE.to_string())
}
