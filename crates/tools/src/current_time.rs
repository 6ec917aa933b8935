//! Current date and time.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolResult};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date, time and weekday."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let now = Local::now();
        Ok(ToolResult::ok(describe(&now)).with_data(serde_json::json!({
            "local": now.to_rfc3339(),
            "utc": now.with_timezone(&Utc).to_rfc3339(),
        })))
    }
}

fn describe<Tz: chrono::TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y-%m-%d %H:%M:%S (%A)").to_string()
}
