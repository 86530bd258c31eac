//! Conversations: state, lifecycle, and the streaming send path.
//!
//! A `Session` wraps persisted `SessionState` plus a provider and a store.
//! `send` appends the user message, runs the provider, forwards its events
//! (minus the internal resumption-handle carrier), accumulates the assistant
//! turn, and persists exactly once after the stream terminates, whether it
//! finished, failed, or was cancelled.

pub mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentError, AgentSpec, AgentStore};
use crate::config::Config;
use crate::event::Event;
use crate::provider::{
    ClaudeCliProvider, EventStream, MockProvider, OpenRouterProvider, Provider, TurnRequest,
    CLAUDE_CLI, MOCK, OPENROUTER,
};
use crate::tools::ToolRegistry;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StorageError, StorageResult};

/// Maximum auto-title length in characters.
const TITLE_MAX_CHARS: usize = 60;

/// Title used until the first user message arrives.
pub const DEFAULT_TITLE: &str = "New conversation";

// ============================================================================
// Data Model
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    #[default]
    Manual,
    Scheduled,
    Trigger,
}

/// A normalized tool call, the same shape regardless of backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    pub input: serde_json::Value,
    /// None while in flight.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Full text, assembled from chunks on completion.
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// On-disk format for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    /// Auto-set from the first user message unless given explicitly.
    pub title: String,
    pub agent_id: String,
    pub provider_id: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub source: SessionSource,
    /// Set when `source` is `scheduled`.
    #[serde(default)]
    pub task_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Backend resumption handle (subprocess backend only).
    #[serde(default)]
    pub resumption_handle: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A turn is already in flight.
    #[error("session {0} is busy with another turn")]
    Busy(String),

    /// Sticky sessions must be unpinned before archiving.
    #[error("session {0} is sticky and cannot be archived")]
    Sticky(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

// ============================================================================
// Helpers
// ============================================================================

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Title from the first line of the first user message, truncated.
fn auto_title(text: &str) -> String {
    let title = text.trim().lines().next().unwrap_or_default().trim();
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let chars: Vec<char> = title.chars().collect();
    if chars.len() > TITLE_MAX_CHARS {
        let mut truncated: String = chars[..TITLE_MAX_CHARS - 1].iter().collect();
        truncated.push('…');
        truncated
    } else {
        title.to_string()
    }
}

/// Resolve a provider id to a concrete backend.
pub fn build_provider(
    provider_id: &str,
    model: &str,
    config: &Config,
    tools: Arc<ToolRegistry>,
) -> Result<Provider, SessionError> {
    match provider_id {
        CLAUDE_CLI => Ok(Provider::ClaudeCli(ClaudeCliProvider::new(
            config.claude_bin(),
            model,
        ))),
        OPENROUTER => Ok(Provider::OpenRouter(OpenRouterProvider::new(
            model,
            config.openrouter_api_key(),
            config.openrouter_base_url(),
            tools,
        ))),
        MOCK => Ok(Provider::Mock(MockProvider::default())),
        other => Err(SessionError::UnknownProvider(other.to_string())),
    }
}

// ============================================================================
// Session
// ============================================================================

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub source: SessionSource,
    /// Overrides the agent's default model.
    pub model: Option<String>,
    pub task_name: Option<String>,
    pub sticky: bool,
    pub title: Option<String>,
}

/// Runtime object for one conversation.
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    provider: Arc<Provider>,
    system_prompt: String,
    store: Arc<dyn SessionStore>,
    busy: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
}

impl Session {
    /// Wrap existing state with a provider and store. Does not persist.
    pub fn new(
        state: SessionState,
        provider: Provider,
        system_prompt: impl Into<String>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            provider: Arc::new(provider),
            system_prompt: system_prompt.into(),
            store,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Create and persist a new session for an agent.
    pub async fn create(
        agent: &AgentSpec,
        options: CreateOptions,
        config: &Config,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, SessionError> {
        let model = options.model.unwrap_or_else(|| agent.model.clone());
        let provider = build_provider(&agent.provider, &model, config, tools)?;
        let now = Utc::now();

        let state = SessionState {
            id: new_session_id(),
            title: options.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            agent_id: agent.id.clone(),
            provider_id: provider.id().to_string(),
            model,
            messages: Vec::new(),
            sticky: options.sticky,
            source: options.source,
            task_name: options.task_name,
            created_at: now,
            updated_at: now,
            resumption_handle: None,
        };

        store.save(&state).await?;
        info!(
            session_id = %state.id,
            agent = %state.agent_id,
            provider = %state.provider_id,
            model = %state.model,
            "session created"
        );

        Ok(Self::new(state, provider, agent.system_prompt.clone(), store))
    }

    /// Load an existing session and rebuild its provider.
    pub async fn resume(
        id: &str,
        config: &Config,
        agents: &AgentStore,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, SessionError> {
        let state = store.load(id).await?;
        let agent = agents.load(&state.agent_id).await?;
        let provider = build_provider(&state.provider_id, &state.model, config, tools)?;
        Ok(Self::new(state, provider, agent.system_prompt, store))
    }

    pub fn id(&self) -> String {
        self.state.lock().unwrap().id.clone()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    /// Send a user message and stream the resulting events.
    ///
    /// Rejects with `Busy` while a previous turn is still streaming. The
    /// internal `session_id` carrier is captured here and never forwarded.
    pub fn send(&self, message: &str) -> Result<EventStream, SessionError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy(self.id()));
        }

        let (history, resume_handle) = {
            let mut state = self.state.lock().unwrap();
            if state.messages.is_empty() && state.title == DEFAULT_TITLE {
                state.title = auto_title(message);
            }
            state.messages.push(Message::user(message));
            let history = state.messages[..state.messages.len() - 1].to_vec();
            (history, state.resumption_handle.clone())
        };

        let request = TurnRequest {
            system_prompt: self.system_prompt.clone(),
            history,
            message: message.to_string(),
            resume_handle,
        };

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();

        let mut inner = self.provider.execute_turn(request);
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let busy = Arc::clone(&self.busy);
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut had_tool_since_text = false;
            let mut cancelled = false;
            let mut failed = false;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        // Consumers still see one terminal event; the
                        // provider task stops when its channel closes.
                        let _ = tx.send(Event::Done).await;
                        break;
                    }
                    next = inner.next() => {
                        let Some(event) = next else { break };

                        match &event {
                            Event::SessionId { id } => {
                                state.lock().unwrap().resumption_handle = Some(id.clone());
                                continue;
                            }
                            Event::TextChunk { content: chunk } => {
                                // Blank line when text resumes after a tool call
                                if had_tool_since_text && !content.is_empty() {
                                    content.push_str("\n\n");
                                }
                                content.push_str(chunk);
                                had_tool_since_text = false;
                            }
                            Event::ToolStart {
                                tool_call_id,
                                tool,
                                input,
                            } => {
                                tool_calls.push(ToolCall {
                                    id: tool_call_id.clone(),
                                    tool: tool.clone(),
                                    input: input.clone(),
                                    output: None,
                                    error: None,
                                    started_at: Utc::now(),
                                    completed_at: None,
                                });
                            }
                            Event::ToolDone {
                                tool_call_id,
                                output,
                                error,
                                ..
                            } => {
                                if let Some(tc) =
                                    tool_calls.iter_mut().find(|tc| tc.id == *tool_call_id)
                                {
                                    tc.output = Some(output.clone());
                                    tc.error = error.clone();
                                    tc.completed_at = Some(Utc::now());
                                }
                                had_tool_since_text = true;
                            }
                            Event::Error { message } => {
                                warn!(error = %message, "turn failed");
                                failed = true;
                            }
                            Event::Done => {}
                        }

                        let terminal = event.is_terminal();
                        // Keep accumulating for persistence even if the
                        // consumer stopped reading.
                        let _ = tx.send(event).await;
                        if terminal {
                            break;
                        }
                    }
                }
            }

            let snapshot = {
                let mut state = state.lock().unwrap();
                // Always a full message pair per turn, even when the
                // assistant produced nothing before termination.
                state.messages.push(Message {
                    role: Role::Assistant,
                    content,
                    tool_calls,
                    timestamp: Utc::now(),
                });
                state.updated_at = Utc::now();
                state.clone()
            };

            if let Err(e) = store.save(&snapshot).await {
                error!(
                    session_id = %snapshot.id,
                    error = %e,
                    "failed to persist session after turn"
                );
            } else {
                info!(
                    session_id = %snapshot.id,
                    turns = snapshot.messages.len(),
                    cancelled,
                    failed,
                    "session saved"
                );
            }

            busy.store(false, Ordering::SeqCst);
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Cancel the in-flight turn, if any. The partial turn is persisted.
    pub fn stop(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Archive a session. Sticky sessions are rejected.
    pub async fn archive(id: &str, store: &dyn SessionStore) -> Result<(), SessionError> {
        let state = store.load(id).await?;
        if state.sticky {
            return Err(SessionError::Sticky(id.to_string()));
        }
        store.archive(id).await?;
        Ok(())
    }

    /// Move an archived session back to active.
    pub async fn restore(id: &str, store: &dyn SessionStore) -> Result<(), SessionError> {
        store.restore(id).await?;
        Ok(())
    }

    /// Delete a session entirely.
    pub async fn delete(id: &str, store: &dyn SessionStore) -> Result<(), SessionError> {
        store.delete(id).await?;
        Ok(())
    }
}
