use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ToolCallId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Lifecycle of one tool invocation within a turn.
///
/// `Requested → Running → {Completed, Failed}`. A request can also fail
/// directly when the tool name does not validate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Requested,
    Running,
    Completed,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_advance_to(self, next: InvocationState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Running)
                | (Self::Requested, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub state: InvocationState,
}

impl ToolInvocation {
    pub fn requested(
        tool_call_id: ToolCallId,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id,
            tool_name: tool_name.into(),
            arguments,
            state: InvocationState::Requested,
        }
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: InvocationState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// One ordered content part of a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolInvocation(ToolInvocation),
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: ToolCallId,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    #[serde(rename_all = "camelCase")]
    Attachment {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message as persisted against its conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolInvocation(inv) => Some(inv),
            _ => None,
        })
    }
}

/// A message as sent by the client with an inbound turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMessage {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TurnMessage {
    pub fn user_text(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            parts: vec![Part::text(text)],
            created_at: None,
        }
    }

    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Bind this message to a conversation for persistence.
    pub fn into_message(self, conversation_id: ConversationId) -> Message {
        Message {
            id: self.id,
            conversation_id,
            role: self.role,
            parts: self.parts,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Most recent message authored by the user, if any.
pub fn most_recent_user_message(messages: &[TurnMessage]) -> Option<&TurnMessage> {
    messages.iter().rev().find(|m| m.role == Role::User)
}
