use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use ward_engine::EngineConfig;
use ward_server::{ServerConfig, TokenTable};
use ward_telemetry::TelemetryConfig;

/// Streaming chat orchestration server.
#[derive(Debug, Parser)]
#[command(name = "ward", version, about)]
pub struct Cli {
    #[arg(long, env = "WARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "WARD_PORT", default_value_t = 9091)]
    pub port: u16,

    /// SQLite database for conversations, messages, patients and documents.
    #[arg(long, env = "WARD_DATABASE", default_value = "ward.db")]
    pub database: PathBuf,

    /// Persist WARN and above to this SQLite file.
    #[arg(long, env = "WARD_OPERATOR_LOG")]
    pub operator_log: Option<PathBuf>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    /// `token=user_id` pairs, comma separated.
    #[arg(long, env = "WARD_API_TOKENS", default_value = "", hide_env_values = true)]
    pub api_tokens: String,

    #[arg(long, env = "WARD_MAX_TURN_SECS", default_value_t = 60)]
    pub max_turn_secs: u64,

    #[arg(long, env = "WARD_MAX_STEPS", default_value_t = 5)]
    pub max_steps: u32,

    #[arg(long, env = "WARD_LOG_LEVEL", default_value_t = Level::INFO)]
    pub log_level: Level,

    #[arg(long, env = "WARD_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            json: self.log_json,
            operator_log_path: self.operator_log.clone(),
            ..Default::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_steps: self.max_steps.max(1),
            max_turn_duration: Duration::from_secs(self.max_turn_secs.max(1)),
            ..Default::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            ..Default::default()
        }
    }

    pub fn token_table(&self) -> Result<TokenTable, String> {
        TokenTable::parse(&self.api_tokens)
    }
}
