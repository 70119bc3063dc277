pub mod context;
pub mod error;
pub mod mux;
pub mod prompts;
pub mod registry;
pub mod runner;
pub mod smooth;
pub mod tools;

pub use context::{ContextFragment, ContextResolver};
pub use error::EngineError;
pub use mux::{Multiplexer, SourceHandle, TurnStream};
pub use registry::ToolRegistry;
pub use runner::{ChatEngine, EngineConfig, Turn, TurnHandle, TurnOutcome};
