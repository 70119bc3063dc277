use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use ward_core::context::LlmContext;
use ward_core::errors::GatewayError;
use ward_core::ids::ToolCallId;
use ward_core::provider::{LlmProvider, ModelStream, StreamOptions};
use ward_core::stream::{ModelEvent, StopReason, ToolCallRequest};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of model events.
    Stream(Vec<ModelEvent>),
    /// Yield the events, then never finish.
    StreamThenHang(Vec<ModelEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A step that streams `text` word by word and ends the turn.
    pub fn text(text: &str) -> Self {
        let mut events: Vec<ModelEvent> = text
            .split_inclusive(' ')
            .map(|w| ModelEvent::TextDelta { delta: w.to_string() })
            .collect();
        events.push(ModelEvent::Finish {
            stop_reason: StopReason::EndTurn,
        });
        Self::Stream(events)
    }

    /// A step that says `preamble` then requests one tool call.
    pub fn tool_call(preamble: &str, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        let mut events = Vec::new();
        if !preamble.is_empty() {
            events.push(ModelEvent::TextDelta {
                delta: preamble.to_string(),
            });
        }
        events.push(ModelEvent::ToolCall(ToolCallRequest {
            id: ToolCallId::from_raw(id),
            name: name.to_string(),
            arguments,
        }));
        events.push(ModelEvent::Finish {
            stop_reason: StopReason::ToolUse,
        });
        Self::Stream(events)
    }

    /// A step that fails mid-stream after `preamble`.
    pub fn stream_error(preamble: &str, error: GatewayError) -> Self {
        Self::Stream(vec![
            ModelEvent::TextDelta {
                delta: preamble.to_string(),
            },
            ModelEvent::Error { error },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every context it was called with.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    contexts: Mutex<Vec<LlmContext>>,
    options: Mutex<Vec<StreamOptions>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            contexts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Contexts received so far, in call order.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.contexts.lock().clone()
    }

    pub fn options(&self) -> Vec<StreamOptions> {
        self.options.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<ModelStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.clone());
        self.options.lock().push(options.clone());

        let next = self.responses.lock().pop_front();
        let Some(mut response) = next else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match response {
                MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
                MockResponse::StreamThenHang(events) => {
                    return Ok(Box::pin(stream::iter(events).chain(stream::pending())))
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    response = *inner;
                }
            }
        }
    }
}
