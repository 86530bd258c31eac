//! Tool dispatch for the tool-loop provider.
//!
//! Tools are self-contained structs implementing the `Tool` trait and are
//! looked up by name in a `ToolRegistry`. Execution failures are returned
//! as errors and folded into `tool_done` events by the caller; they never
//! terminate a stream.

mod bash;
mod current_time;
mod web_fetch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bash::BashTool;
pub use current_time::CurrentTimeTool;
pub use web_fetch::WebFetchTool;

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Tool definition in the OpenAI function-calling shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A tool that can be invoked during a turn.
///
/// Each implementation holds its own dependencies (HTTP client, clock) and
/// knows how to execute itself, so new tools never touch the dispatch path.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute with JSON input, returning the output text.
    async fn execute(&self, input: &serde_json::Value) -> Result<String, ToolError>;
}

/// Shared tool reference.
pub type SharedTool = Arc<dyn Tool>;

/// Name-indexed collection of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, SharedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BashTool));
        registry.register(Arc::new(CurrentTimeTool));
        registry.register(Arc::new(WebFetchTool::new()));
        registry
    }

    pub fn register(&mut self, tool: SharedTool) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("echo", "Echo the input back", None)
        }

        async fn execute(&self, input: &serde_json::Value) -> Result<String, ToolError> {
            let text = input
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".to_string()))?;
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let output = registry
            .execute("echo", &serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(output, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nope", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn invalid_arguments_surface_as_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let err = registry
            .execute("echo", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn builtin_registry_advertises_definitions() {
        let registry = ToolRegistry::builtin();
        let mut names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["bash", "current_time", "web_fetch"]);
    }
}
