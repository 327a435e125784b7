//! Progress events emitted while a turn is processed.
//!
//! Each variant carries only the fields relevant to its kind; the serialized
//! form is a tagged object (`{"type": "...", ...}`) that a transport layer
//! can frame as SSE or any other wire format.

use serde::{Deserialize, Serialize};

/// A single progress event for one conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The turn has started; the model is planning.
    Status { status: String },
    /// One incremental chain-of-thought token.
    ReasoningToken { token: String },
    /// One incremental answer token.
    Token { token: String },
    /// The full planning text, emitted once before tool execution.
    Reasoning { content: String },
    /// A SQL query is about to run.
    ToolCall { query: String },
    /// Result of a SQL query. `result` is present on success.
    ToolResult {
        query: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// Terminal success: the final answer and its conversation.
    Done {
        conversation_id: String,
        response: String,
    },
    /// Terminal failure with a human-readable message.
    Error { message: String },
}

impl ChatEvent {
    pub fn thinking() -> Self {
        ChatEvent::Status {
            status: "thinking".to_string(),
        }
    }

    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
