//! Conversation and message types.
//!
//! A `Conversation` is an ordered message list owned by the store; insertion
//! order is the dialogue. Messages carry a phase tag describing their semantic
//! purpose on top of the wire role, plus an audit trail of tool calls on the
//! assistant message that issued them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inference::types::{ChatMessage, Role, ToolCallRequest, ToolCallResponse};

// ─── Phases ──────────────────────────────────────────────────────────────────

/// Semantic purpose of a message, on top of its wire role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePhase {
    /// A user request.
    Request,
    /// Assistant planning text that led to tool calls.
    Reasoning,
    /// A tool result.
    Tool,
    /// Assistant answer derived from tool results.
    Interpret,
    /// Assistant answer given without touching the database.
    Output,
    /// The system prompt.
    System,
}

impl MessagePhase {
    /// Default phase for a role when none was set explicitly.
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::User => MessagePhase::Request,
            Role::System => MessagePhase::System,
            Role::Tool => MessagePhase::Tool,
            Role::Assistant => MessagePhase::Output,
        }
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Audit record of a single SQL tool call: the query the model asked for and
/// the serialized payload it was shown. Attached to the assistant message
/// that issued the call; not part of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub query: String,
    pub response: String,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    /// Absent for assistant messages that are pure tool-call requests.
    pub content: Option<String>,
    pub phase: MessagePhase,
    /// Tool-call requests issued by an assistant message, replayed verbatim
    /// on later requests so the provider sees the call/result pairing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_requests: Option<Vec<ToolCallRequest>>,
    /// Audit trail of executed calls (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    /// Links a tool-role message back to the triggering call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Plain message with the role's default phase.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            phase: MessagePhase::default_for(role),
            tool_requests: None,
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Same as [`new`] with an explicit phase tag.
    pub fn with_phase(role: Role, content: impl Into<String>, phase: MessagePhase) -> Self {
        Self {
            phase,
            ..Self::new(role, content)
        }
    }

    /// Assistant message carrying tool-call requests (content optional).
    pub fn assistant_tool_requests(
        content: Option<String>,
        requests: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            phase: MessagePhase::Reasoning,
            tool_requests: Some(requests),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Tool-result message linked to the triggering call.
    pub fn tool_result(tool_call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(payload.into()),
            phase: MessagePhase::Tool,
            tool_requests: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            timestamp: Utc::now(),
        }
    }

    /// Convert to the wire format expected by the provider.
    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            tool_call_id: self.tool_call_id.clone(),
            tool_calls: self
                .tool_requests
                .as_ref()
                .map(|reqs| reqs.iter().map(ToolCallResponse::from).collect()),
        }
    }
}

// ─── Conversations ───────────────────────────────────────────────────────────

/// An ordered message sequence with a unique identifier.
///
/// The first message is always the system prompt. Mutated only by appending,
/// except the system message's text, which is refreshed before every model
/// call to carry a current timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation seeded with the system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            messages: vec![StoredMessage::new(Role::System, system_prompt)],
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message and bump the activity timestamp.
    pub fn push(&mut self, message: StoredMessage) {
        self.last_activity = message.timestamp;
        self.messages.push(message);
    }
}

/// Lightweight listing entry for a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
