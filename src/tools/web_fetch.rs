//! Web fetch tool for retrieving page contents.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Tool, ToolDefinition, ToolError};

/// Maximum characters returned to the model.
const MAX_OUTPUT_CHARS: usize = 51_200;

/// Fetches a URL over HTTP(S) and returns the body text, truncated.
pub struct WebFetchTool {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct WebFetchArgs {
    url: String,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("valet/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "web_fetch",
            "Fetch a web page over HTTP or HTTPS and return its body text.",
            Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Absolute http:// or https:// URL to fetch",
                    },
                },
                "required": ["url"],
            })),
        )
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<String, ToolError> {
        let args: WebFetchArgs = serde_json::from_value(input.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let url = reqwest::Url::parse(&args.url)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid URL: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ToolError::InvalidArguments(format!(
                    "unsupported URL scheme: {scheme}"
                )));
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to read body: {e}")))?;

        if body.chars().count() > MAX_OUTPUT_CHARS {
            let truncated: String = body.chars().take(MAX_OUTPUT_CHARS).collect();
            Ok(format!("{truncated}\n\n[truncated]"))
        } else {
            Ok(body)
        }
    }
}
