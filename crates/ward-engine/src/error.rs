use std::time::Duration;

use ward_core::errors::GatewayError;
use ward_core::tools::ToolError;
use ward_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller does not own the referenced resource.
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("turn aborted")]
    Aborted,

    #[error("turn deadline exceeded after {0:?}")]
    Deadline(Duration),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Rejections raised before any side effect took place.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Unauthorized | Self::NotFound(_))
    }
}
