//! Shell execution tool.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use super::{Tool, ToolDefinition, ToolError};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum characters returned to the model.
const MAX_OUTPUT_CHARS: usize = 51_200;

/// Runs a shell command and returns its combined stdout and stderr.
pub struct BashTool;

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "bash",
            "Execute a shell command and return its combined stdout and stderr. \
             Use this to read or write files, run scripts, and search content.",
            Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute",
                    },
                },
                "required": ["command"],
            })),
        )
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<String, ToolError> {
        let args: BashArgs = serde_json::from_value(input.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        info!(
            command = %args.command.chars().take(100).collect::<String>(),
            "running shell command"
        );

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new("sh")
                .arg("-c")
                .arg(&args.command)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            ToolError::ExecutionFailed(format!(
                "command timed out after {} seconds",
                COMMAND_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to run command: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim_end());
        }

        info!(exit = ?output.status.code(), output_len = text.len(), "command finished");

        let text = text.trim().to_string();
        if text.is_empty() {
            return Ok("(no output)".to_string());
        }
        if text.chars().count() > MAX_OUTPUT_CHARS {
            let truncated: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
            return Ok(format!("{truncated}\n\n[truncated]"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let output = BashTool
            .execute(&serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn combines_stderr_with_stdout() {
        let output = BashTool
            .execute(&serde_json::json!({"command": "echo out; echo err >&2"}))
            .await
            .unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn empty_output_is_marked() {
        let output = BashTool
            .execute(&serde_json::json!({"command": "true"}))
            .await
            .unwrap();
        assert_eq!(output, "(no output)");
    }

    #[tokio::test]
    async fn missing_command_is_invalid() {
        let err = BashTool
            .execute(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
