//! Current time tool.

use async_trait::async_trait;
use chrono::Utc;

use super::{Tool, ToolDefinition, ToolError};

/// Reports the current UTC date and time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "current_time",
            "Get the current date and time in UTC (RFC 3339).",
            Some(serde_json::json!({
                "type": "object",
                "properties": {},
            })),
        )
    }

    async fn execute(&self, _input: &serde_json::Value) -> Result<String, ToolError> {
        Ok(Utc::now().to_rfc3339())
    }
}
