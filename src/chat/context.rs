//! Context budgeting: keep outbound requests under a token ceiling without
//! breaking the conversation's turn structure.
//!
//! Naive truncation by message count can sever a tool-call request from its
//! tool result, which providers reject as malformed. Messages are therefore
//! grouped into turns (a user message plus every following non-user message)
//! and dropped oldest-turn-first, never splitting a turn.

use crate::inference::types::ChatMessage;

use super::tokens::{estimate_message_tokens, estimate_system_prompt_tokens};
use super::types::{Conversation, StoredMessage};

/// Tokens reserved out of the context window for the tool schema and the
/// response itself when deriving the default ceiling.
pub const SCHEMA_RESERVE_TOKENS: u32 = 600;

/// Default token ceiling for a model with the given context window.
pub fn default_ceiling(context_window: u32, max_tokens: u32) -> u32 {
    context_window.saturating_sub(max_tokens + SCHEMA_RESERVE_TOKENS)
}

/// Emergency ceiling used for one rebuild after a provider context-length
/// rejection.
pub fn emergency_ceiling(context_window: u32, max_tokens: u32) -> u32 {
    default_ceiling(context_window, max_tokens) / 2
}

/// Group every message after the system message into turns. A turn starts at
/// a `user`-role message and runs up to (but not including) the next one.
/// Leading non-user messages (possible if history was truncated externally)
/// form a turn of their own.
fn partition_turns(messages: &[StoredMessage]) -> Vec<&[StoredMessage]> {
    let mut turns = Vec::new();
    let mut start = 0;
    for (i, msg) in messages.iter().enumerate() {
        if msg.role == crate::inference::Role::User && i > start {
            turns.push(&messages[start..i]);
            start = i;
        }
    }
    if start < messages.len() {
        turns.push(&messages[start..]);
    }
    turns
}

/// Build the outbound message list: the given system prompt first, then the
/// newest contiguous sequence of complete turns that fits the ceiling.
///
/// The system message is always kept, even if it alone is near the ceiling.
/// The conversation is not mutated; the system prompt argument replaces the
/// stored system text for this request only (phase prompts compose with it).
pub fn build_budgeted_messages(
    conversation: &Conversation,
    system_prompt: &str,
    ceiling: u32,
) -> Vec<ChatMessage> {
    let history = match conversation.messages.split_first() {
        Some((first, rest)) if first.role == crate::inference::Role::System => rest,
        _ => &conversation.messages[..],
    };

    let turns = partition_turns(history);
    let mut budget_used = estimate_system_prompt_tokens(system_prompt);

    // Walk turns newest-first, accumulating whole turns while they fit.
    let mut kept = turns.len();
    for (i, turn) in turns.iter().enumerate().rev() {
        let turn_cost: u32 = turn.iter().map(estimate_message_tokens).sum();
        if budget_used + turn_cost > ceiling {
            break;
        }
        budget_used += turn_cost;
        kept = i;
    }

    let mut out = Vec::new();
    out.push(ChatMessage::text(
        crate::inference::Role::System,
        system_prompt,
    ));
    for turn in &turns[kept.min(turns.len())..] {
        for msg in turn.iter() {
            out.push(msg.to_wire());
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
