mod operator_log;

pub use operator_log::{OperatorLog, OperatorLogLayer, OperatorLogQuery, OperatorLogRecord};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "ward_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of the human-readable format.
    pub json: bool,
    /// Where to persist WARN+ records. `None` disables the operator log.
    pub operator_log_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            operator_log_path: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("operator log: {0}")]
    OperatorLog(#[from] rusqlite::Error),
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Keeps the operator log reachable for queries after init.
pub struct TelemetryGuard {
    operator_log: Option<Arc<OperatorLog>>,
}

impl TelemetryGuard {
    pub fn operator_log(&self) -> Option<&OperatorLog> {
        self.operator_log.as_deref()
    }
}

/// Build the filter directive string from a config: default level plus
/// per-module overrides.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directives = filter_directives(&config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let operator_log = match &config.operator_log_path {
        Some(path) => Some(Arc::new(OperatorLog::open(path)?)),
        None => None,
    };
    let operator_layer = operator_log.clone().map(OperatorLogLayer::new);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(operator_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    Ok(TelemetryGuard { operator_log })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("ward_engine".into(), Level::DEBUG),
                ("ward_llm".into(), Level::TRACE),
            ],
            ..Default::default()
        };
        assert_eq!(
            filter_directives(&config),
            "warn,ward_engine=debug,ward_llm=trace"
        );
    }

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json);
        assert!(config.operator_log_path.is_none());
    }
}
