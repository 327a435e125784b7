//! Conversation storage.
//!
//! The engine reads snapshots and commits whole phases as append batches, so
//! a cancelled turn never leaves a half-written message in the store. The
//! trait does not assume process-wide lifetime; a persistent backend can
//! implement it later.

use std::collections::HashMap;
use std::sync::Mutex;

use super::errors::EngineError;
use super::types::{Conversation, ConversationSummary, StoredMessage};

/// Storage abstraction for conversations.
pub trait ConversationStore: Send + Sync {
    /// Create a conversation seeded with the given system prompt.
    fn create(&self, system_prompt: &str) -> Conversation;

    /// Snapshot a conversation by id.
    fn get(&self, id: &str) -> Option<Conversation>;

    /// List all conversations, most recently active first.
    fn list(&self) -> Vec<ConversationSummary>;

    /// Remove a conversation. Returns `true` if it existed.
    fn remove(&self, id: &str) -> bool;

    /// Append a batch of messages atomically.
    fn append(&self, id: &str, messages: Vec<StoredMessage>) -> Result<(), EngineError>;

    /// Replace the system message's text in place.
    fn refresh_system(&self, id: &str, system_prompt: &str) -> Result<(), EngineError>;
}

/// In-memory store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock still guards a consistent map (appends are whole-batch
    /// pushes), so recover it rather than propagating the panic.
    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn with_conversation<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Conversation) -> T,
    ) -> Result<T, EngineError> {
        let mut map = self.lock_map();
        match map.get_mut(id) {
            Some(conv) => Ok(f(conv)),
            None => Err(EngineError::ConversationNotFound { id: id.to_string() }),
        }
    }
}

impl ConversationStore for MemoryStore {
    fn create(&self, system_prompt: &str) -> Conversation {
        let conv = Conversation::new(system_prompt);
        let mut map = self.lock_map();
        map.insert(conv.id.clone(), conv.clone());
        conv
    }

    fn get(&self, id: &str) -> Option<Conversation> {
        let map = self.lock_map();
        map.get(id).cloned()
    }

    fn list(&self) -> Vec<ConversationSummary> {
        let map = self.lock_map();
        let mut summaries: Vec<ConversationSummary> = map
            .values()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                created_at: c.created_at,
                last_activity: c.last_activity,
                message_count: c.messages.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    fn remove(&self, id: &str) -> bool {
        let mut map = self.lock_map();
        map.remove(id).is_some()
    }

    fn append(&self, id: &str, messages: Vec<StoredMessage>) -> Result<(), EngineError> {
        self.with_conversation(id, |conv| {
            for msg in messages {
                conv.push(msg);
            }
        })
    }

    fn refresh_system(&self, id: &str, system_prompt: &str) -> Result<(), EngineError> {
        self.with_conversation(id, |conv| {
            if let Some(first) = conv.messages.first_mut() {
                first.content = Some(system_prompt.to_string());
            }
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
