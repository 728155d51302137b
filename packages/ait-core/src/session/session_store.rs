//! Dialog session registry, keyed by caller-supplied join key.
//!
//! A `Session` is the multi-speaker, audio-bearing dialog for one join
//! key: a flat, timestamp-ordered pair of user/assistant sequences plus
//! the monotonic counter that names its audio files. This is distinct
//! from a [`crate::session::Conversation`] (single-speaker, no audio,
//! keyed by a server-generated UUID) and from the generation cache —
//! the three are independent registries (see `state::AppState`), not
//! nested inside one another.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{AitError, AitResult};
use crate::session::dialog::{merge_by_timestamp, now_secs, AssistantResponse, DialogTurn, UserMessage};

/// Per-join-key dialog state. Internally locked so an HTTP handler (for
/// synchronous duplicate-message-id rejection) and a worker (for
/// appending the reply) can both touch the same session without the
/// registry itself serializing unrelated join keys behind one lock.
pub struct Session {
    join_key: String,
    created_at: f64,
    last_listened_at: f64,
    user_messages: Vec<UserMessage>,
    assistant_responses: Vec<AssistantResponse>,
    audio_sequence_counter: u64,
}

impl Session {
    fn new(join_key: String) -> Self {
        let now = now_secs();
        Self {
            join_key,
            created_at: now,
            last_listened_at: now,
            user_messages: Vec::new(),
            assistant_responses: Vec::new(),
            audio_sequence_counter: 0,
        }
    }

    pub fn join_key(&self) -> &str {
        &self.join_key
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn last_listened_at(&self) -> f64 {
        self.last_listened_at
    }

    pub fn touch_listened(&mut self) {
        self.last_listened_at = now_secs();
    }

    /// Appends a user turn, rejecting a `message_id` already present in
    /// this session. This is the at-most-once key (invariant #1):
    /// duplicate submission is rejected synchronously, never retried.
    pub fn push_user_message(&mut self, message: UserMessage) -> AitResult<()> {
        if self.user_messages.iter().any(|m| m.message_id == message.message_id) {
            return Err(AitError::InvalidInput(format!(
                "duplicate message_id {}",
                message.message_id
            )));
        }
        self.user_messages.push(message);
        Ok(())
    }

    pub fn push_assistant_response(&mut self, response: AssistantResponse) {
        self.assistant_responses.push(response);
    }

    /// Finds the assistant response keyed by `response_id` (the
    /// originating `message_id`), most recent match first.
    pub fn find_response_mut(&mut self, response_id: &str) -> Option<&mut AssistantResponse> {
        self.assistant_responses
            .iter_mut()
            .rev()
            .find(|r| r.response_id == response_id)
    }

    pub fn response_for(&self, response_id: &str) -> Option<&AssistantResponse> {
        self.assistant_responses
            .iter()
            .rev()
            .find(|r| r.response_id == response_id)
    }

    pub fn has_message_id(&self, message_id: &str) -> bool {
        self.user_messages.iter().any(|m| m.message_id == message_id)
    }

    /// The timestamp-merged dialog handed to the chat provider. Never
    /// built from worker completion order — see `merge_by_timestamp`.
    pub fn dialog(&self) -> Vec<DialogTurn> {
        merge_by_timestamp(&self.user_messages, &self.assistant_responses)
    }

    pub fn user_messages(&self) -> &[UserMessage] {
        &self.user_messages
    }

    pub fn assistant_responses(&self) -> &[AssistantResponse] {
        &self.assistant_responses
    }

    /// Allocates the next audio sequence number. Invariant #2: strictly
    /// increasing, obtained only after a successful chat call so a
    /// failed job never burns a number.
    pub fn next_sequence(&mut self) -> u64 {
        let n = self.audio_sequence_counter;
        self.audio_sequence_counter += 1;
        n
    }

    pub fn sequence_counter(&self) -> u64 {
        self.audio_sequence_counter
    }

    /// Responses that became ready at or after `cutoff` — the candidate
    /// set for the direct-stream generator (Mode A)'s playback window.
    pub fn responses_ready_since(&self, cutoff: f64) -> Vec<&AssistantResponse> {
        self.assistant_responses
            .iter()
            .filter(|r| r.audio_ready_at.is_some_and(|t| t >= cutoff))
            .collect()
    }
}

/// Registry of live dialog sessions, one per join key.
///
/// Join keys are opaque caller-supplied strings, validated upstream
/// (non-empty, no embedded whitespace) before ever reaching the store.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Returns the session for `join_key` and whether it was just
    /// created. Callers that need to start a broadcaster mount or
    /// archive prior on-disk state on first use key off the `bool`.
    pub fn get_or_create(&self, join_key: &str) -> (Arc<Mutex<Session>>, bool) {
        let mut created = false;
        let session = self
            .sessions
            .entry(join_key.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Session::new(join_key.to_string())))
            })
            .clone();
        (session, created)
    }

    pub fn get(&self, join_key: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(join_key).map(|entry| entry.clone())
    }

    /// Removes and returns the session for `join_key`, for reset/eviction.
    pub fn remove(&self, join_key: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.remove(join_key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots every live join key, for the reaper's sweep.
    pub fn join_keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> UserMessage {
        UserMessage::new(format!("hello-{id}"), "alice".into(), id.into())
    }

    #[test]
    fn get_or_create_returns_same_session_for_same_key() {
        let store = SessionStore::new();
        let (a, a_new) = store.get_or_create("key1");
        let (b, b_new) = store.get_or_create("key1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a_new);
        assert!(!b_new);
    }

    #[test]
    fn distinct_keys_get_distinct_sessions() {
        let store = SessionStore::new();
        let (a, _) = store.get_or_create("key1");
        let (b, _) = store.get_or_create("key2");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let store = SessionStore::new();
        let (session, _) = store.get_or_create("key1");
        let mut guard = session.lock();
        assert!(guard.push_user_message(msg("m1")).is_ok());
        let err = guard.push_user_message(msg("m1")).unwrap_err();
        assert!(matches!(err, AitError::InvalidInput(_)));
        assert_eq!(guard.user_messages().len(), 1);
    }

    #[test]
    fn sequence_counter_is_strictly_increasing() {
        let store = SessionStore::new();
        let (session, _) = store.get_or_create("key1");
        let mut guard = session.lock();
        assert_eq!(guard.next_sequence(), 0);
        assert_eq!(guard.next_sequence(), 1);
        assert_eq!(guard.next_sequence(), 2);
        assert_eq!(guard.sequence_counter(), 3);
    }

    #[test]
    fn remove_drops_session_from_registry() {
        let store = SessionStore::new();
        store.get_or_create("key1");
        assert!(store.remove("key1").is_some());
        assert!(store.get("key1").is_none());
    }

    #[test]
    fn dialog_merges_by_timestamp() {
        let store = SessionStore::new();
        let (session, _) = store.get_or_create("key1");
        let mut guard = session.lock();
        guard.push_user_message(msg("a")).unwrap();
        guard.push_assistant_response(AssistantResponse::new("hi".into(), "Nyx".into(), "a".into()));
        assert_eq!(guard.dialog().len(), 2);
    }
}
