use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use ward_core::errors::GatewayError;
use ward_core::ids::ToolCallId;
use ward_core::stream::{ModelEvent, StopReason, ToolCallRequest};

/// State machine for parsing Anthropic SSE stream events into model events.
///
/// Tool-use blocks are buffered until their `content_block_stop`, so a
/// `ToolCall` is only emitted once its arguments are complete.
#[derive(Default)]
pub struct SseParser {
    tool_blocks: HashMap<usize, ToolBlock>,
    stop_reason: Option<StopReason>,
}

struct ToolBlock {
    id: String,
    name: String,
    arguments_json: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one SSE event and return zero or more model events.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<ModelEvent> {
        let mut events = Vec::new();

        match event_type {
            "content_block_start" => {
                if let Ok(block) = serde_json::from_str::<ContentBlockStartEvent>(data) {
                    if block.content_block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        let field = |k: &str| {
                            block
                                .content_block
                                .get(k)
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string()
                        };
                        self.tool_blocks.insert(
                            block.index,
                            ToolBlock {
                                id: field("id"),
                                name: field("name"),
                                arguments_json: String::new(),
                            },
                        );
                    }
                }
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    let text = |k: &str| {
                        delta
                            .delta
                            .get(k)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    match delta.delta.get("type").and_then(Value::as_str) {
                        Some("text_delta") => {
                            events.push(ModelEvent::TextDelta { delta: text("text") })
                        }
                        Some("thinking_delta") => {
                            events.push(ModelEvent::ReasoningDelta { delta: text("thinking") })
                        }
                        Some("input_json_delta") => {
                            if let Some(block) = self.tool_blocks.get_mut(&delta.index) {
                                block.arguments_json.push_str(&text("partial_json"));
                            }
                        }
                        _ => {}
                    }
                }
            }

            "content_block_stop" => {
                if let Ok(stop) = serde_json::from_str::<ContentBlockStopEvent>(data) {
                    if let Some(block) = self.tool_blocks.remove(&stop.index) {
                        events.push(finish_tool_block(block));
                    }
                }
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = Some(StopReason::parse(&reason));
                    }
                }
            }

            "message_stop" => {
                events.push(ModelEvent::Finish {
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
                });
            }

            "error" => {
                let error = match serde_json::from_str::<ErrorEvent>(data) {
                    Ok(err) => classify_error(&err),
                    Err(e) => GatewayError::MalformedEvent(e.to_string()),
                };
                events.push(ModelEvent::Error { error });
            }

            _ => {} // message_start, ping
        }

        events
    }
}

fn finish_tool_block(block: ToolBlock) -> ModelEvent {
    let arguments = if block.arguments_json.trim().is_empty() {
        Ok(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_str::<Value>(&block.arguments_json)
    };
    match arguments {
        Ok(arguments) => ModelEvent::ToolCall(ToolCallRequest {
            id: ToolCallId::from_raw(block.id),
            name: block.name,
            arguments,
        }),
        Err(e) => ModelEvent::Error {
            error: GatewayError::MalformedEvent(format!("tool_use {} arguments: {e}", block.name)),
        },
    }
}

fn classify_error(err: &ErrorEvent) -> GatewayError {
    match err.error.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" => GatewayError::AuthenticationFailed(err.error.message.clone()),
        "invalid_request_error" => GatewayError::InvalidRequest(err.error.message.clone()),
        _ => GatewayError::ServerError {
            status: 500,
            body: err.error.message.clone(),
        },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            if !current_data.is_empty() {
                current_data.push('\n');
            }
            current_data.push_str(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((std::mem::take(&mut current_event), std::mem::take(&mut current_data)));
        } else if line.is_empty() {
            current_data.clear();
        }
    }

    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

// --- Deserialization types for Anthropic SSE events ---

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: Value,
}

#[derive(Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDeltaPayload,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut SseParser, raw: &str) -> Vec<ModelEvent> {
        parse_sse_lines(raw)
            .into_iter()
            .flat_map(|(ev, data)| parser.parse_event(&ev, &data))
            .collect()
    }

    #[test]
    fn text_stream() {
        let raw = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let mut parser = SseParser::new();
        let events = feed(&mut parser, raw);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ModelEvent::TextDelta { delta } if delta == "Hello"));
        assert!(matches!(&events[1], ModelEvent::TextDelta { delta } if delta == " world"));
        assert!(matches!(events[2], ModelEvent::Finish { stop_reason: StopReason::EndTurn }));
    }

    #[test]
    fn tool_use_emitted_on_block_stop() {
        let mut parser = SseParser::new();
        let start = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"getWeather","input":{}}}"#;
        assert!(parser.parse_event("content_block_start", start).is_empty());

        let d1 = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"latitude\": 52.5,"}}"#;
        let d2 = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":" \"longitude\": 13.4}"}}"#;
        assert!(parser.parse_event("content_block_delta", d1).is_empty());
        assert!(parser.parse_event("content_block_delta", d2).is_empty());

        let events = parser.parse_event("content_block_stop", r#"{"type":"content_block_stop","index":1}"#);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ModelEvent::ToolCall(call) => {
                assert_eq!(call.id.as_str(), "toolu_1");
                assert_eq!(call.name, "getWeather");
                assert_eq!(call.arguments["longitude"], 13.4);
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }

        parser.parse_event("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#);
        let events = parser.parse_event("message_stop", r#"{"type":"message_stop"}"#);
        assert!(matches!(events[0], ModelEvent::Finish { stop_reason: StopReason::ToolUse }));
    }

    #[test]
    fn empty_tool_arguments_become_object() {
        let mut parser = SseParser::new();
        parser.parse_event(
            "content_block_start",
            r#"{"index":0,"content_block":{"type":"tool_use","id":"t","name":"noop"}}"#,
        );
        let events = parser.parse_event("content_block_stop", r#"{"index":0}"#);
        assert!(matches!(&events[0], ModelEvent::ToolCall(c) if c.arguments.is_object()));
    }

    #[test]
    fn malformed_tool_arguments_are_an_error() {
        let mut parser = SseParser::new();
        parser.parse_event(
            "content_block_start",
            r#"{"index":0,"content_block":{"type":"tool_use","id":"t","name":"x"}}"#,
        );
        parser.parse_event(
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        );
        let events = parser.parse_event("content_block_stop", r#"{"index":0}"#);
        assert!(matches!(
            &events[0],
            ModelEvent::Error { error: GatewayError::MalformedEvent(_) }
        ));
    }

    #[test]
    fn thinking_delta() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"thinking_delta","thinking":"considering"}}"#,
        );
        assert!(matches!(&events[0], ModelEvent::ReasoningDelta { delta } if delta == "considering"));
    }

    #[test]
    fn error_event_classified() {
        let mut parser = SseParser::new();
        let events = parser.parse_event(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert!(matches!(
            events[0],
            ModelEvent::Error { error: GatewayError::ProviderOverloaded }
        ));
    }

    #[test]
    fn parse_sse_lines_handles_missing_space_and_trailing_event() {
        let pairs = parse_sse_lines("event:ping\ndata:{}\n\nevent: message_stop\ndata: {}");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("ping".to_string(), "{}".to_string()));
        assert_eq!(pairs[1].0, "message_stop");
    }
}
