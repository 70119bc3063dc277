use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use ward_core::tools::{Tool, ToolContext, ToolError, ToolResult};

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

pub struct GetWeatherTool {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GetWeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    latitude: f64,
    longitude: f64,
}

impl GetWeatherTool {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("ward/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn forecast_url(&self) -> String {
        format!("{}/v1/forecast", self.base_url.trim_end_matches('/'))
    }
}

fn parse_args(args: serde_json::Value) -> Result<WeatherArgs, ToolError> {
    let args: WeatherArgs = ToolError::parse_args(args)?;
    if !(-90.0..=90.0).contains(&args.latitude) {
        return Err(ToolError::InvalidArguments(format!(
            "latitude {} out of range",
            args.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&args.longitude) {
        return Err(ToolError::InvalidArguments(format!(
            "longitude {} out of range",
            args.longitude
        )));
    }
    Ok(args)
}

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Get the current weather at a location"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["latitude", "longitude"],
            "properties": {
                "latitude": { "type": "number" },
                "longitude": { "type": "number" }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let args = parse_args(args)?;

        let response = self
            .client
            .get(self.forecast_url())
            .query(&[
                ("latitude", args.latitude.to_string()),
                ("longitude", args.longitude.to_string()),
                ("current", "temperature_2m".to_string()),
                ("hourly", "temperature_2m".to_string()),
                ("daily", "sunrise,sunset".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("weather request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::error(serde_json::json!({
                "error": format!("weather service returned HTTP {status}")
            })));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("weather response unreadable: {e}")))?;
        Ok(ToolResult::ok(body))
    }
}
