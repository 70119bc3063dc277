use ward_core::provider::ThinkingConfig;

/// A selectable chat model variant as exposed to clients.
#[derive(Clone, Debug)]
pub struct ChatModel {
    /// Identifier clients send with a turn.
    pub id: &'static str,
    pub display_name: &'static str,
    /// Model name sent to the provider API.
    pub api_model: &'static str,
    pub max_output: u32,
    /// Reasoning-only variants run without any tools.
    pub tools_enabled: bool,
    pub thinking_budget: Option<u32>,
}

impl ChatModel {
    pub fn thinking(&self) -> ThinkingConfig {
        match self.thinking_budget {
            Some(tokens) => ThinkingConfig::Budget { tokens },
            None => ThinkingConfig::Disabled,
        }
    }
}

pub static CHAT_MODEL: ChatModel = ChatModel {
    id: "chat-model",
    display_name: "Chat model",
    api_model: "claude-sonnet-4-5-20250929",
    max_output: 8_192,
    tools_enabled: true,
    thinking_budget: None,
};

pub static CHAT_MODEL_REASONING: ChatModel = ChatModel {
    id: "chat-model-reasoning",
    display_name: "Reasoning model",
    api_model: "claude-sonnet-4-5-20250929",
    max_output: 16_000,
    tools_enabled: false,
    thinking_budget: Some(8_000),
};

pub static ALL_MODELS: &[&ChatModel] = &[&CHAT_MODEL, &CHAT_MODEL_REASONING];

pub fn find_model(id: &str) -> Option<&'static ChatModel> {
    ALL_MODELS.iter().find(|m| m.id == id).copied()
}

pub fn default_model() -> &'static ChatModel {
    &CHAT_MODEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_known_models() {
        assert_eq!(find_model("chat-model").unwrap().id, "chat-model");
        assert_eq!(find_model("chat-model-reasoning").unwrap().id, "chat-model-reasoning");
        assert!(find_model("gpt-5").is_none());
    }

    #[test]
    fn reasoning_variant_disables_tools() {
        let m = find_model("chat-model-reasoning").unwrap();
        assert!(!m.tools_enabled);
        assert!(matches!(m.thinking(), ThinkingConfig::Budget { tokens: 8_000 }));
        assert!(default_model().tools_enabled);
        assert_eq!(default_model().thinking(), ThinkingConfig::Disabled);
    }

    #[test]
    fn thinking_budget_below_max_output() {
        for m in ALL_MODELS {
            if let Some(budget) = m.thinking_budget {
                assert!(budget < m.max_output, "{} budget must leave room for output", m.id);
            }
        }
    }
}
