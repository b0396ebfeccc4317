//! Time tool: the server's local date and time.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use palaver_core::error::ToolError;
use palaver_core::tool::{Tool, ToolResult};

pub struct TimeTool;

/// `Current time: YYYY-MM-DD HH:MM:SS <offset>`.
pub fn describe<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S %:z"))
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(describe(&Local::now())))
    }
}
