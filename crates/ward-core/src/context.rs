use serde::{Deserialize, Serialize};

use crate::messages::{Part, Role};
use crate::tools::ToolDefinition;

/// One message as the model sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// The complete context sent to a provider for one model step.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn push(&mut self, role: Role, parts: Vec<Part>) {
        if parts.is_empty() {
            return;
        }
        self.messages.push(ModelMessage { role, parts });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_skips_empty_messages() {
        let mut ctx = LlmContext::default();
        ctx.push(Role::Assistant, Vec::new());
        assert!(ctx.messages.is_empty());
        ctx.push(Role::User, vec![Part::text("hi")]);
        assert_eq!(ctx.messages.len(), 1);
    }
}
