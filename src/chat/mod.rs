//! Conversation engine — phase machine, storage, budgeting, and events.
//!
//! The engine drives one user turn through reasoning, tool execution, a
//! bounded retry loop, and interpretation, emitting progress events as it
//! goes. Everything the model sees is assembled here: the timestamped system
//! prompt, the budgeted history tail, and the `execute_sql_query` tool.

pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod prompts;
pub mod store;
pub mod tokens;
pub mod tool;
pub mod types;

// Re-exports for convenience
pub use engine::{ChatEngine, MAX_RETRY_ROUNDS};
pub use errors::EngineError;
pub use events::ChatEvent;
pub use store::{ConversationStore, MemoryStore};
pub use types::{Conversation, ConversationSummary, MessagePhase, StoredMessage, ToolCallRecord};
