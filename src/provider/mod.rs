//! Model-execution backends.
//!
//! Two structurally different backends hide behind one capability: turn a
//! `TurnRequest` into a normalized event stream. `ClaudeCli` delegates the
//! whole turn to a resumable subprocess; `OpenRouter` drives a stateless
//! chat-completions API plus a local tool loop; `Mock` is scripted for tests.
//!
//! Guarantees every variant upholds: events arrive in causal order, the
//! stream is finite with exactly one terminal event (`done` or `error`),
//! and backend faults are folded into `error` events rather than raised.

pub mod claude_cli;
pub mod mock;
pub mod openrouter;

use std::pin::Pin;

use futures::Stream;

use crate::event::Event;
use crate::session::Message;

pub use claude_cli::ClaudeCliProvider;
pub use mock::MockProvider;
pub use openrouter::OpenRouterProvider;

/// Provider identifier for the subprocess backend.
pub const CLAUDE_CLI: &str = "claude-cli";
/// Provider identifier for the REST backend.
pub const OPENROUTER: &str = "openrouter";
/// Provider identifier for the scripted test backend.
pub const MOCK: &str = "mock";

/// Stream of events for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Everything a backend needs to execute one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Agent system prompt. May be empty.
    pub system_prompt: String,
    /// Prior conversation, excluding the new user message.
    pub history: Vec<Message>,
    /// The new user message.
    pub message: String,
    /// Backend resumption handle from an earlier turn, if any.
    pub resume_handle: Option<String>,
}

/// A model-execution backend.
pub enum Provider {
    ClaudeCli(ClaudeCliProvider),
    OpenRouter(OpenRouterProvider),
    Mock(MockProvider),
}

impl Provider {
    /// Stable identifier, as stored in session state.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::ClaudeCli(_) => CLAUDE_CLI,
            Provider::OpenRouter(_) => OPENROUTER,
            Provider::Mock(_) => MOCK,
        }
    }

    /// Execute one turn, returning its event stream.
    pub fn execute_turn(&self, request: TurnRequest) -> EventStream {
        match self {
            Provider::ClaudeCli(p) => p.execute_turn(request),
            Provider::OpenRouter(p) => p.execute_turn(request),
            Provider::Mock(p) => p.execute_turn(request),
        }
    }
}
