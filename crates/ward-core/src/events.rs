use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Wire-level unit of the outbound turn stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        delta: String,
    },
    ReasoningDelta {
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: ToolCallId,
        tool_name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: ToolCallId,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    Error {
        message: String,
    },
    /// Tool progress notification.
    Data {
        payload: serde_json::Value,
    },
    Done,
}

impl StreamEvent {
    /// The wire discriminator, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Error { .. } => "error",
            Self::Data { .. } => "data",
            Self::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Who produced an outbound event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    Model,
    #[serde(rename_all = "camelCase")]
    Tool { tool_call_id: ToolCallId },
    /// The turn itself. Only `done` is attributed here.
    Turn,
}

/// A stream event tagged with its source and per-source sequence number.
///
/// `seq` starts at 0 for every source and increases by one per event, so a
/// receiver can reconstruct each source's emission order from an
/// interleaved stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub source: EventSource,
    pub seq: u64,
    #[serde(flatten)]
    pub event: StreamEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_event_wire_shape() {
        let ev = OutboundEvent {
            source: EventSource::Tool { tool_call_id: ToolCallId::from_raw("call_1") },
            seq: 2,
            event: StreamEvent::Error { message: "timeout".into() },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["seq"], 2);
        assert_eq!(json["source"]["kind"], "tool");
        assert_eq!(json["source"]["toolCallId"], "call_1");
        assert_eq!(json["message"], "timeout");
    }

    #[test]
    fn outbound_event_parses_back() {
        let json = r#"{"source":{"kind":"model"},"seq":0,"type":"text-delta","delta":"Hi "}"#;
        let ev: OutboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.source, EventSource::Model);
        assert_eq!(ev.event, StreamEvent::TextDelta { delta: "Hi ".into() });
    }

    #[test]
    fn kind_matches_serde_tag() {
        let events = vec![
            StreamEvent::TextDelta { delta: "a".into() },
            StreamEvent::ReasoningDelta { delta: "b".into() },
            StreamEvent::ToolCall {
                tool_call_id: ToolCallId::from_raw("c"),
                tool_name: "getWeather".into(),
                arguments: serde_json::json!({}),
            },
            StreamEvent::ToolResult {
                tool_call_id: ToolCallId::from_raw("c"),
                tool_name: "getWeather".into(),
                result: serde_json::json!({}),
                is_error: false,
            },
            StreamEvent::Error { message: "x".into() },
            StreamEvent::Data { payload: serde_json::json!({"kind": "id"}) },
            StreamEvent::Done,
        ];
        for ev in &events {
            let json = serde_json::to_value(ev).unwrap();
            assert_eq!(json["type"], ev.kind());
        }
    }
}
