//! Token estimation for context window management.
//!
//! Uses character-based heuristics calibrated for LLM tokenizers:
//! - English prose: ~3.2 chars/token (conservative — overestimate is safer)
//! - JSON/structured content: ~2.8 chars/token (denser due to punctuation, short keys)
//!
//! A more accurate tokenizer (tiktoken-rs) can replace this when the model
//! is finalized.

use crate::inference::Role;

use super::types::StoredMessage;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
///
/// Calibrated conservatively — most LLM tokenizers produce ~3.5-4.0 chars/token
/// for English text. We use 3.2 to err on the side of overestimation, which is
/// safer than underestimating and overflowing the context window.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
///
/// JSON tokenizes more densely than prose due to punctuation, short keys,
/// braces, and colons. Tool call arguments, tool results, and schema
/// definitions all fall into this category.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count for a string of natural language text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.len() as f64;
    (chars / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    let chars = json_text.len() as f64;
    (chars / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for a stored message.
///
/// Accounts for content, replayed tool-call requests, and per-message
/// overhead. Tool results and call arguments are JSON, so they use the
/// denser estimator.
pub fn estimate_message_tokens(message: &StoredMessage) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    if let Some(ref content) = message.content {
        total += match message.role {
            Role::Tool => estimate_json_tokens(content),
            _ => estimate_tokens(content),
        };
    }

    if let Some(ref requests) = message.tool_requests {
        for call in requests {
            total += TOOL_CALL_OVERHEAD_TOKENS;
            total += estimate_tokens(&call.name);
            total += estimate_json_tokens(&call.arguments);
        }
    }

    if let Some(ref id) = message.tool_call_id {
        total += estimate_tokens(id);
    }

    total
}

/// Estimate the token count for a system prompt string.
pub fn estimate_system_prompt_tokens(prompt: &str) -> u32 {
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(prompt)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
