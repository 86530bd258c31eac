//! Streaming event protocol.
//!
//! The same `Event` values flow everywhere: yielded by providers, consumed
//! by sessions, forwarded to the CLI, and asserted on in tests. `SessionId`
//! is internal only; `Session::send` captures it and never forwards it.

use serde::{Deserialize, Serialize};

/// One event in a turn's stream.
///
/// Every stream is finite and ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Incremental assistant text.
    TextChunk { content: String },

    /// A tool invocation began.
    ToolStart {
        tool_call_id: String,
        tool: String,
        input: serde_json::Value,
    },

    /// A tool invocation finished.
    ToolDone {
        tool_call_id: String,
        tool: String,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The turn completed normally.
    Done,

    /// The turn failed. Terminal, like `Done`.
    Error { message: String },

    /// Backend resumption handle. Emitted first when present, filtered out
    /// before events reach any consumer.
    SessionId { id: String },
}

impl Event {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done | Event::Error { .. })
    }

    /// Convenience constructor for text chunks.
    pub fn text(content: impl Into<String>) -> Self {
        Event::TextChunk {
            content: content.into(),
        }
    }

    /// Convenience constructor for errors.
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }
}
