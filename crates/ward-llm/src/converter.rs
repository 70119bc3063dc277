use serde_json::{json, Value};

use ward_core::context::{LlmContext, ModelMessage};
use ward_core::messages::{Part, Role};
use ward_core::provider::{StreamOptions, ThinkingConfig};

const DEFAULT_MAX_TOKENS: u32 = 8_192;

/// Convert an LlmContext into the Anthropic Messages API request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions) -> Value {
    let mut body = json!({
        "model": options.model,
        "stream": true,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let ThinkingConfig::Budget { tokens } = &options.thinking {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": tokens});
    }

    if !context.system.is_empty() {
        body["system"] = json!(context.system);
    }

    body["messages"] = json!(convert_messages(&context.messages));

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Convert messages into alternating user/assistant API messages.
///
/// Tool results always travel on the user side, so an assistant message that
/// carries its own results is split around them. Adjacent blocks with the
/// same API role are merged.
fn convert_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut out: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        for part in &msg.parts {
            let Some((role, block)) = convert_part(msg.role, part) else {
                continue;
            };
            match out.last_mut() {
                Some((last_role, blocks)) if *last_role == role => blocks.push(block),
                _ => out.push((role, vec![block])),
            }
        }
    }

    out.into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

fn convert_part(role: Role, part: &Part) -> Option<(&'static str, Value)> {
    let side = match role {
        Role::Assistant => "assistant",
        Role::User | Role::Tool => "user",
    };
    match part {
        Part::Text { text } if text.is_empty() => None,
        Part::Text { text } => Some((side, json!({"type": "text", "text": text}))),
        // Unsigned reasoning cannot be replayed to the API.
        Part::Reasoning { .. } => None,
        Part::ToolInvocation(inv) => Some((
            "assistant",
            json!({
                "type": "tool_use",
                "id": inv.tool_call_id.as_str(),
                "name": inv.tool_name,
                "input": inv.arguments,
            }),
        )),
        Part::ToolResult {
            tool_call_id,
            result,
            is_error,
            ..
        } => Some((
            "user",
            json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id.as_str(),
                "content": result_text(result),
                "is_error": is_error,
            }),
        )),
        Part::Attachment {
            url,
            name,
            content_type,
        } => {
            let is_image = content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("image/"));
            if is_image {
                Some((side, json!({"type": "image", "source": {"type": "url", "url": url}})))
            } else {
                let label = name.as_deref().unwrap_or("attachment");
                Some((side, json!({"type": "text", "text": format!("[{label}]({url})")})))
            }
        }
    }
}

fn result_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
