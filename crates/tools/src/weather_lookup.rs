//! Weather lookup tool — deterministic mock data.
//!
//! No weather service is wired in; the numbers are derived from a hash of the
//! city name so the same question always gets the same answer.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolResult};
use serde::Serialize;

pub struct WeatherLookupTool;

#[async_trait]
impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        "weather_lookup"
    }

    fn description(&self) -> &str {
        "Look up the current weather for a city (simulated data). Returns conditions, temperature and humidity."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "minLength": 1,
                    "description": "City name, e.g. 'Beijing' or 'Paris'"
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "Temperature units (default: metric)"
                }
            },
            "required": ["city"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let city = arguments["city"].as_str().unwrap_or_default().trim();
        let imperial = arguments["units"].as_str() == Some("imperial");
        let report = mock_weather(city, imperial);

        let output = format!(
            "Weather in {}: {}, {}{}, humidity {}% (simulated)",
            report.city, report.conditions, report.temperature, report.units, report.humidity
        );
        let data = serde_json::to_value(&report).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "weather_lookup".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok(output).with_data(data))
    }
}

#[derive(Debug, Serialize)]
struct WeatherReport {
    city: String,
    conditions: &'static str,
    temperature: f64,
    units: &'static str,
    humidity: u32,
    simulated: bool,
}

fn mock_weather(city: &str, imperial: bool) -> WeatherReport {
    const CONDITIONS: [&str; 5] = ["Sunny", "Partly cloudy", "Overcast", "Light rain", "Showers"];

    let hash = city
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    // -5..=35 °C, the same range the UI advertises.
    let celsius = (hash % 41) as f64 - 5.0;
    let (temperature, units) = if imperial {
        ((celsius * 9.0 / 5.0 + 32.0).round(), "°F")
    } else {
        (celsius, "°C")
    };

    WeatherReport {
        city: city.to_string(),
        conditions: CONDITIONS[(hash as usize / 41) % CONDITIONS.len()],
        temperature,
        units,
        humidity: 30 + (hash / 7) % 61,
        simulated: true,
    }
}
