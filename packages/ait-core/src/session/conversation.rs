//! Single-speaker, history-preserving conversation, keyed by a
//! server-generated UUID.
//!
//! Unlike a [`crate::session::Session`], a `Conversation` carries no
//! audio and no join key of its own — callers address it by the
//! `conversation_key` returned from `/conversation/start`. The registry
//! that holds these (`ConversationStore`) is what's bounded by a ring
//! capacity, evicting the oldest *conversation*, not the oldest turn
//! within one.

use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::protocol_constants::DEFAULT_RING_CAPACITY;
use crate::session::dialog::{merge_by_timestamp, AssistantResponse, DialogTurn, UserMessage};

/// Dialog with a single AI character, with history but no audio.
pub struct Conversation {
    conversation_key: String,
    pub model: String,
    pub system_instructions: String,
    pub options: JsonValue,
    user_messages: Vec<UserMessage>,
    assistant_responses: Vec<AssistantResponse>,
}

impl Conversation {
    pub fn new(conversation_key: String, model: String, system_instructions: String, options: JsonValue) -> Self {
        Self {
            conversation_key,
            model,
            system_instructions,
            options,
            user_messages: Vec::new(),
            assistant_responses: Vec::new(),
        }
    }

    pub fn conversation_key(&self) -> &str {
        &self.conversation_key
    }

    pub fn push_user_message(&mut self, message: UserMessage) {
        self.user_messages.push(message);
    }

    pub fn push_assistant_response(&mut self, response: AssistantResponse) {
        self.assistant_responses.push(response);
    }

    pub fn response_for(&self, response_id: &str) -> Option<&AssistantResponse> {
        self.assistant_responses
            .iter()
            .rev()
            .find(|r| r.response_id == response_id)
    }

    pub fn user_messages(&self) -> &[UserMessage] {
        &self.user_messages
    }

    pub fn assistant_responses(&self) -> &[AssistantResponse] {
        &self.assistant_responses
    }

    /// Builds the timestamp-merged dialog to hand to a chat provider.
    pub fn dialog(&self) -> Vec<DialogTurn> {
        merge_by_timestamp(&self.user_messages, &self.assistant_responses)
    }
}

/// Registry of live conversations, bounded to `capacity` entries.
/// Insertion past capacity evicts the oldest conversation by creation
/// order, keeping the longest-lived conversations resident.
pub struct ConversationStore {
    entries: DashMap<String, Arc<Mutex<Conversation>>>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Creates a new conversation under a fresh UUID key, evicting the
    /// oldest entry first if the registry is at capacity.
    pub fn create(&self, model: String, system_instructions: String, options: JsonValue) -> Arc<Mutex<Conversation>> {
        let key = uuid::Uuid::new_v4().to_string();
        let conversation = Arc::new(Mutex::new(Conversation::new(key.clone(), model, system_instructions, options)));

        let mut order = self.order.lock();
        if order.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        order.push_back(key.clone());
        self.entries.insert(key, conversation.clone());
        conversation
    }

    pub fn get(&self, conversation_key: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.entries.get(conversation_key).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_returns_distinct_keys() {
        let store = ConversationStore::new();
        let a = store.create("llama3.2".into(), "be nice".into(), json!({}));
        let b = store.create("llama3.2".into(), "be nice".into(), json!({}));
        assert_ne!(a.lock().conversation_key(), b.lock().conversation_key());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn eviction_drops_oldest_conversation_not_newest() {
        let store = ConversationStore::with_capacity(2);
        let a = store.create("m".into(), "s".into(), json!({}));
        let a_key = a.lock().conversation_key().to_string();
        let _b = store.create("m".into(), "s".into(), json!({}));
        let c = store.create("m".into(), "s".into(), json!({}));
        let c_key = c.lock().conversation_key().to_string();

        assert!(store.get(&a_key).is_none(), "oldest conversation should be evicted");
        assert!(store.get(&c_key).is_some(), "newest conversation must survive");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dialog_merges_by_timestamp() {
        let store = ConversationStore::new();
        let conv = store.create("m".into(), "s".into(), json!({}));
        let mut guard = conv.lock();
        guard.push_user_message(UserMessage::new("hi".into(), "alice".into(), "m1".into()));
        guard.push_assistant_response(AssistantResponse::new("hello".into(), "assistant".into(), "m1".into()));
        assert_eq!(guard.dialog().len(), 2);
    }
}
