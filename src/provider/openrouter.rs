//! REST backend for OpenAI-compatible chat completions via OpenRouter.
//!
//! Stateless: the full normalized history is sent on every call. Streams
//! `stream: true` responses over SSE, accumulates tool calls from deltas,
//! dispatches them against the local `ToolRegistry`, feeds the results back,
//! and repeats until the model answers without tool calls. This is the one
//! backend that populates `tool_start`/`tool_done` events.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::session::{Message, Role};
use crate::sse::SseEventStream;
use crate::tools::{ToolDefinition, ToolRegistry};

use super::{EventStream, TurnRequest};

/// Upper bound on request/execute rounds within one turn.
const MAX_TOOL_ITERATIONS: usize = 8;

/// Backend driving the OpenRouter chat-completions API.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    tools: Arc<ToolRegistry>,
}

impl OpenRouterProvider {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            tools,
        }
    }

    pub(super) fn execute_turn(&self, request: TurnRequest) -> EventStream {
        let client = self.client.clone();
        let model = self.model.clone();
        let api_key = self.api_key.clone();
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let tools = Arc::clone(&self.tools);
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            run_turn(client, model, api_key, url, tools, request, tx).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn run_turn(
    client: reqwest::Client,
    model: String,
    api_key: String,
    url: String,
    tools: Arc<ToolRegistry>,
    request: TurnRequest,
    tx: mpsc::Sender<Event>,
) {
    if api_key.is_empty() {
        let _ = tx
            .send(Event::error(
                "OpenRouter API key is not configured. Set openrouter.api_key or OPENROUTER_API_KEY.",
            ))
            .await;
        return;
    }

    let mut messages = Vec::new();
    if !request.system_prompt.is_empty() {
        messages.push(ChatMessage::system(&request.system_prompt));
    }
    for msg in &request.history {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(ChatMessage::text(role, &msg.content));
    }
    messages.push(ChatMessage::text("user", &request.message));

    let definitions = tools.definitions();
    let definitions = (!definitions.is_empty()).then_some(definitions);

    info!(model = %model, history = request.history.len(), "turn started");

    for iteration in 0..MAX_TOOL_ITERATIONS {
        let body = StreamRequest {
            model: &model,
            messages: &messages,
            tools: definitions.as_deref(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = match client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Event::error(format!("request failed: {e}"))).await;
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            let _ = tx
                .send(Event::error(format!("API error {status}: {message}")))
                .await;
            return;
        }

        let mut sse = SseEventStream::new(response.bytes_stream());
        let mut round_text = String::new();
        let mut accumulators: Vec<ToolCallAccumulator> = Vec::new();

        loop {
            // Returning drops the response and releases the connection
            // once the consumer is gone.
            let event = tokio::select! {
                _ = tx.closed() => return,
                next = sse.next() => match next {
                    Some(e) => e,
                    None => break,
                },
            };
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    let _ = tx.send(Event::error(format!("stream failed: {e}"))).await;
                    return;
                }
            };

            if event.data.is_empty() {
                continue;
            }
            if event.data == "[DONE]" {
                break;
            }

            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(e) => {
                    debug!(data = %event.data, error = %e, "failed to parse SSE chunk");
                    continue;
                }
            };

            let Some(choice) = chunk.choices.first() else {
                continue;
            };

            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    round_text.push_str(content);
                    if tx.send(Event::text(content.clone())).await.is_err() {
                        return;
                    }
                }
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    while accumulators.len() <= tc.index {
                        accumulators.push(ToolCallAccumulator::default());
                    }
                    let acc = &mut accumulators[tc.index];
                    if let Some(id) = &tc.id {
                        acc.id = id.clone();
                    }
                    if let Some(function) = &tc.function {
                        if let Some(name) = &function.name {
                            acc.name = name.clone();
                        }
                        if let Some(arguments) = &function.arguments {
                            acc.arguments.push_str(arguments);
                        }
                    }
                }
            }
        }

        let calls: Vec<_> = accumulators
            .into_iter()
            .filter(|acc| !acc.id.is_empty())
            .collect();

        if calls.is_empty() {
            info!(iterations = iteration + 1, "turn done");
            let _ = tx.send(Event::Done).await;
            return;
        }

        // Record the assistant round before executing its tool calls.
        messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: (!round_text.is_empty()).then(|| round_text.clone()),
            tool_calls: Some(
                calls
                    .iter()
                    .map(|acc| WireToolCall {
                        id: acc.id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunctionCall {
                            name: acc.name.clone(),
                            arguments: acc.arguments.clone(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        });

        for acc in calls {
            let input: serde_json::Value =
                serde_json::from_str(&acc.arguments).unwrap_or_else(|_| serde_json::json!({}));

            if tx
                .send(Event::ToolStart {
                    tool_call_id: acc.id.clone(),
                    tool: acc.name.clone(),
                    input: input.clone(),
                })
                .await
                .is_err()
            {
                return;
            }

            let (output, error, result_text) = match tools.execute(&acc.name, &input).await {
                Ok(output) => {
                    info!(tool = %acc.name, "tool done");
                    (output.clone(), None, output)
                }
                Err(e) => {
                    warn!(tool = %acc.name, error = %e, "tool failed");
                    let message = e.to_string();
                    (String::new(), Some(message.clone()), format!("Error: {message}"))
                }
            };

            if tx
                .send(Event::ToolDone {
                    tool_call_id: acc.id.clone(),
                    tool: acc.name.clone(),
                    output,
                    error,
                })
                .await
                .is_err()
            {
                return;
            }

            messages.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(result_text),
                tool_calls: None,
                tool_call_id: Some(acc.id),
            });
        }
    }

    let _ = tx
        .send(Event::error(format!(
            "tool loop exceeded {MAX_TOOL_ITERATIONS} iterations"
        )))
        .await;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
    /// Ask for usage stats in the final chunk (OpenRouter supports this).
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        Self::text("system", content)
    }

    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

/// Accumulates one tool call across streaming chunks: the id and name arrive
/// first, then the arguments in pieces.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionCall>,
}

#[derive(Deserialize)]
struct StreamFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"hel"},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));
    }

    #[test]
    fn parses_tool_call_delta_chunk() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_fetch","arguments":"{\"ur"}}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("web_fetch")
        );
    }

    #[test]
    fn usage_only_chunk_has_no_choices() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":3}}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn request_omits_empty_tool_list() {
        let body = StreamRequest {
            model: "test-model",
            messages: &[ChatMessage::text("user", "hi")],
            tools: None,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
    }
}
