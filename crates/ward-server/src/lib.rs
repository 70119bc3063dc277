pub mod auth;
pub mod chat;
pub mod error;
pub mod patients;
pub mod server;

pub use auth::{Principal, TokenTable};
pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
