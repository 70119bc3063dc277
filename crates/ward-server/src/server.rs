use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use ward_engine::ChatEngine;
use ward_store::SqliteStore;

use crate::auth::TokenTable;
use crate::{chat, patients};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bounds how long a handler may take to produce response headers. A
    /// streaming body is not cut off by it; the turn deadline governs that.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub store: SqliteStore,
    pub tokens: Arc<TokenTable>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api/chat", post(chat::post_chat).delete(chat::delete_chat))
        .route("/api/chat/{id}/messages", get(chat::get_messages))
        .route("/api/patient", post(patients::create_patient).get(patients::get_patients))
        .route("/api/patient/{id}", get(patients::get_patient))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. The returned handle owns the server task.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, &config);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "ward server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for open ones to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "activeTurns": state.engine.active_turns(),
    }))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ward_core::ids::UserId;
    use ward_engine::{EngineConfig, ToolRegistry};
    use ward_llm::{MockProvider, MockResponse};
    use ward_store::Database;

    pub const TOKEN_A: &str = "tok_a";
    pub const TOKEN_B: &str = "tok_b";
    pub const USER_A: &str = "user_a";
    pub const USER_B: &str = "user_b";

    pub struct TestServer {
        pub handle: ServerHandle,
        pub store: SqliteStore,
        pub provider: Arc<MockProvider>,
        pub engine: Arc<ChatEngine>,
        pub client: reqwest::Client,
    }

    impl TestServer {
        pub async fn start(responses: Vec<MockResponse>) -> Self {
            let store = SqliteStore::new(Database::in_memory().unwrap());
            let provider = Arc::new(MockProvider::new(responses));
            let config = EngineConfig {
                smoothing: false,
                ..Default::default()
            };
            let engine = Arc::new(ChatEngine::new(
                provider.clone(),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(ToolRegistry::default()),
                config,
            ));

            let mut tokens = TokenTable::new();
            tokens.insert(TOKEN_A, UserId::from_raw(USER_A));
            tokens.insert(TOKEN_B, UserId::from_raw(USER_B));

            let state = AppState {
                engine: engine.clone(),
                store: store.clone(),
                tokens: Arc::new(tokens),
            };
            let config = ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                ..Default::default()
            };
            let handle = start(config, state).await.unwrap();

            Self {
                handle,
                store,
                provider,
                engine,
                client: reqwest::Client::new(),
            }
        }

        pub fn url(&self, path: &str) -> String {
            format!("http://127.0.0.1:{}{path}", self.handle.port)
        }
    }
}
