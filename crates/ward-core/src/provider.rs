use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::ModelEvent;

pub type ModelStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// Options controlling one model step.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub thinking: ThinkingConfig,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: None,
            thinking: ThinkingConfig::Disabled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingConfig {
    Disabled,
    Budget { tokens: u32 },
}

/// A model backend. One call to `stream` covers exactly one model step.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<ModelStream, GatewayError>;
}
