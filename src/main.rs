mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;

use ward_engine::tools::create_default_registry;
use ward_engine::ChatEngine;
use ward_llm::{AnthropicProvider, ProviderConfig};
use ward_server::AppState;
use ward_store::{Database, SqliteStore};

use crate::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = ward_telemetry::init_telemetry(cli.telemetry_config())?;

    tracing::info!("starting ward");

    let db = Database::open(&cli.database)
        .with_context(|| format!("open database {}", cli.database.display()))?;
    let store = SqliteStore::new(db);

    let api_key = cli
        .anthropic_api_key
        .clone()
        .context("ANTHROPIC_API_KEY is not set")?;
    let mut provider_config = ProviderConfig::new(SecretString::from(api_key));
    if let Some(base_url) = &cli.anthropic_base_url {
        provider_config.base_url = base_url.clone();
    }
    let provider = AnthropicProvider::new(provider_config)?;

    let tokens = cli.token_table().map_err(anyhow::Error::msg)?;
    if tokens.is_empty() {
        tracing::warn!("no API tokens configured, every request will be rejected");
    }

    let registry = create_default_registry(&store);
    tracing::info!(tools = ?registry.names(), "tools registered");

    let engine = Arc::new(ChatEngine::new(
        Arc::new(provider),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(registry),
        cli.engine_config(),
    ));

    let state = AppState {
        engine: Arc::clone(&engine),
        store,
        tokens: Arc::new(tokens),
    };
    let handle = ward_server::start(cli.server_config(), state)
        .await
        .context("start server")?;

    tracing::info!(port = handle.port, "ward ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;

    tracing::info!("shutting down");
    engine.abort_all();
    handle.shutdown().await;
    Ok(())
}
