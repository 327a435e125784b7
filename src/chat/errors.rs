//! Conversation engine error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that terminate the current turn.
///
/// Tool-level failures (rejected or failed queries) never appear here — they
/// are folded back into the conversation as tool-result content so the model
/// can retry. Only conditions that make progress impossible surface as
/// `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Even the emergency token ceiling could not fit the conversation.
    /// The conversation itself is left intact for inspection.
    #[error("conversation too large for the model context window")]
    ContextTooLarge,

    /// Provider-level failure (connection, timeout, HTTP error, bad stream).
    #[error("model provider error: {0}")]
    Provider(#[from] InferenceError),

    /// The referenced conversation does not exist in the store.
    #[error("conversation not found: '{id}'")]
    ConversationNotFound { id: String },

    /// The event consumer dropped its receiver mid-turn. Not user-facing;
    /// the turn stops at the next phase boundary without committing further
    /// messages.
    #[error("event stream cancelled by consumer")]
    Cancelled,
}

impl EngineError {
    /// Human-readable message for the terminal `error` event.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::ContextTooLarge => {
                "This conversation has grown too long for the model. \
                 Please start a new conversation."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}
