//! Cache of single-shot generation results (`GENERATE` and `TRANSLATION`
//! request kinds), keyed by `message_id` for polling.
//!
//! Unlike a `Conversation`, a single-shot generation has no speaker and no
//! merged dialog — it is a request/response pair that the caller polls
//! until ready, then (usually) never touches again. This is a single
//! process-wide registry (see `state::AppState`), not nested inside a
//! `Session` or `Conversation` — bounded the same way the conversation
//! registry is, oldest-eviction-on-insert, so a caller who never polls
//! can't grow it unbounded.

use std::collections::VecDeque;

use serde_json::Value as JsonValue;

use crate::protocol_constants::DEFAULT_RING_CAPACITY;

#[derive(Debug, Clone)]
pub enum GenerationStatus {
    Pending,
    Ready { text: String, filename: Option<String> },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct GenerationEntry {
    pub message_id: String,
    pub input: String,
    pub system_instructions: String,
    pub model: String,
    pub options: JsonValue,
    pub status: GenerationStatus,
}

/// Process-wide registry of `GENERATE`/`TRANSLATION` requests, bounded to
/// `capacity` entries with oldest-eviction on insert.
pub struct GenerationCache {
    capacity: usize,
    entries: VecDeque<GenerationEntry>,
}

impl GenerationCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Registers a new pending generation, evicting the oldest entry if
    /// the cache is at capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_pending(
        &mut self,
        message_id: String,
        input: String,
        system_instructions: String,
        model: String,
        options: JsonValue,
    ) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(GenerationEntry {
            message_id,
            input,
            system_instructions,
            model,
            options,
            status: GenerationStatus::Pending,
        });
    }

    pub fn mark_ready(&mut self, message_id: &str, text: String, filename: Option<String>) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.message_id == message_id) {
            entry.status = GenerationStatus::Ready { text, filename };
        }
    }

    pub fn mark_failed(&mut self, message_id: &str, message: String) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.message_id == message_id) {
            entry.status = GenerationStatus::Failed { message };
        }
    }

    pub fn status(&self, message_id: &str) -> Option<&GenerationStatus> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.message_id == message_id)
            .map(|e| &e.status)
    }

    pub fn entry(&self, message_id: &str) -> Option<&GenerationEntry> {
        self.entries.iter().rev().find(|e| e.message_id == message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GenerationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(cache: &mut GenerationCache, message_id: &str) {
        cache.insert_pending(
            message_id.to_string(),
            "hello".into(),
            "be terse".into(),
            "llama3.2".into(),
            json!({}),
        );
    }

    #[test]
    fn unknown_message_id_returns_none() {
        let cache = GenerationCache::new();
        assert!(cache.status("missing").is_none());
    }

    #[test]
    fn pending_then_ready_transition() {
        let mut cache = GenerationCache::new();
        insert(&mut cache, "m1");
        assert!(matches!(cache.status("m1"), Some(GenerationStatus::Pending)));

        cache.mark_ready("m1", "bonjour".into(), Some("0001.mp3".into()));
        match cache.status("m1") {
            Some(GenerationStatus::Ready { text, filename }) => {
                assert_eq!(text, "bonjour");
                assert_eq!(filename.as_deref(), Some("0001.mp3"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn eviction_drops_oldest_pending_entry() {
        let mut cache = GenerationCache::with_capacity(1);
        insert(&mut cache, "m1");
        insert(&mut cache, "m2");
        assert!(cache.status("m1").is_none());
        assert!(cache.status("m2").is_some());
    }

    #[test]
    fn entry_retains_request_fields() {
        let mut cache = GenerationCache::new();
        insert(&mut cache, "m1");
        let entry = cache.entry("m1").unwrap();
        assert_eq!(entry.model, "llama3.2");
        assert_eq!(entry.system_instructions, "be terse");
    }
}
