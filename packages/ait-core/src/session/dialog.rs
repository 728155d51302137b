//! Dialog records shared by sessions and conversations.
//!
//! Both a multi-speaker [`crate::session::session_store::Session`] and a
//! single-speaker [`crate::session::conversation::Conversation`] keep two
//! parallel sequences — user turns and assistant turns — and must present
//! them to the chat provider merged by *timestamp*, not by arrival or
//! completion order. See `getDialog` on each.

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the Unix epoch, as an `f64` so sub-second
/// ordering survives the sort used by `merge_by_timestamp`.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs_f64()
}

/// A user-submitted turn. Immutable once stored.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub message: String,
    pub speaker_name: String,
    pub message_id: String,
    pub timestamp: f64,
}

impl UserMessage {
    pub fn new(message: String, speaker_name: String, message_id: String) -> Self {
        Self {
            message,
            speaker_name,
            message_id,
            timestamp: now_secs(),
        }
    }
}

/// An AI-generated turn.
#[derive(Debug, Clone)]
pub struct AssistantResponse {
    pub text: String,
    pub character_name: String,
    /// The `message_id` of the `UserMessage` that produced this response.
    pub response_id: String,
    /// `None` iff the system is configured without a TTS provider.
    pub filename: Option<String>,
    pub timestamp: f64,
    /// Set exactly once, when TTS finishes and the file is written.
    pub audio_ready_at: Option<f64>,
}

impl AssistantResponse {
    pub fn new(text: String, character_name: String, response_id: String) -> Self {
        Self {
            text,
            character_name,
            response_id,
            filename: None,
            timestamp: now_secs(),
            audio_ready_at: None,
        }
    }
}

/// Either side of a merged dialog, ready to hand to a chat provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct DialogTurn {
    pub role: Role,
    pub speaker: String,
    pub content: String,
    pub timestamp: f64,
}

/// Merges user and assistant turns by `timestamp` so the narrative order
/// seen by the LLM never depends on which worker finished first.
///
/// This is the one place invariant #4 (deferred ordering) is enforced;
/// every call site that builds a provider-facing dialog must go through it.
pub fn merge_by_timestamp(
    user_messages: &[UserMessage],
    assistant_responses: &[AssistantResponse],
) -> Vec<DialogTurn> {
    let mut turns: Vec<DialogTurn> = Vec::with_capacity(user_messages.len() + assistant_responses.len());
    for m in user_messages {
        turns.push(DialogTurn {
            role: Role::User,
            speaker: m.speaker_name.clone(),
            content: m.message.clone(),
            timestamp: m.timestamp,
        });
    }
    for r in assistant_responses {
        turns.push(DialogTurn {
            role: Role::Assistant,
            speaker: r.character_name.clone(),
            content: r.text.clone(),
            timestamp: r.timestamp,
        });
    }
    turns.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    turns
}

/// Strips a leading `"<character_name>: "` or `"<character_name>:"` prefix
/// (case-insensitive) from LLM output.
///
/// Fallback for providers without structured-output support, which would
/// otherwise let the model narrate other characters' lines.
pub fn strip_character_prefix(text: &str, character_name: &str) -> String {
    let with_space = format!("{}: ", character_name);
    let without_space = format!("{}:", character_name);

    if let Some(head) = text.get(..with_space.len()) {
        if head.eq_ignore_ascii_case(&with_space) {
            return text[with_space.len()..].to_string();
        }
    }
    if let Some(head) = text.get(..without_space.len()) {
        if head.eq_ignore_ascii_case(&without_space) {
            return text[without_space.len()..].trim_start().to_string();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_at(t: f64, id: &str) -> UserMessage {
        UserMessage {
            message: format!("msg-{id}"),
            speaker_name: "alice".into(),
            message_id: id.into(),
            timestamp: t,
        }
    }

    fn response_at(t: f64, response_id: &str) -> AssistantResponse {
        AssistantResponse {
            text: format!("resp-{response_id}"),
            character_name: "Bot".into(),
            response_id: response_id.into(),
            filename: None,
            timestamp: t,
            audio_ready_at: None,
        }
    }

    #[test]
    fn merge_orders_by_timestamp_not_arrival() {
        // Responses complete out of submission order (b stalls longest).
        let users = vec![user_at(1.0, "a"), user_at(2.0, "b"), user_at(3.0, "c")];
        let responses = vec![response_at(4.0, "a"), response_at(6.0, "c"), response_at(5.0, "b")];

        let turns = merge_by_timestamp(&users, &responses);
        let timestamps: Vec<f64> = turns.iter().map(|t| t.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn strip_prefix_with_colon_space() {
        assert_eq!(strip_character_prefix("Nyx: hello there", "Nyx"), "hello there");
    }

    #[test]
    fn strip_prefix_case_insensitive_no_space() {
        assert_eq!(strip_character_prefix("nyx:hello", "Nyx"), "hello");
    }

    #[test]
    fn strip_prefix_noop_when_absent() {
        assert_eq!(strip_character_prefix("hello there", "Nyx"), "hello there");
    }
}
