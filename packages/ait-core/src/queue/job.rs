//! Job envelope handed from an HTTP handler to the worker pool.
//!
//! A `RequestKind` tags which pipeline a job belongs to; the worker pool
//! dispatches on it rather than needing one channel per pipeline. The
//! user message itself is never carried in the job: the HTTP handler
//! inserts it into the session/conversation synchronously (so a
//! duplicate `message_id` can be rejected with a 400 before anything is
//! queued) and the worker re-reads it from there when it builds the
//! dialog to send to the chat provider.

/// The four request shapes the generation pipeline accepts. Each has a
/// distinct prompt/history shape but shares the same queue-and-poll
/// lifecycle: enqueue, worker picks it up, result lands where the caller
/// polls for it.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// Multi-speaker join-key dialog (`/ait/postMessage`). The user
    /// message for `message_id` is already in the session by the time
    /// this is dequeued.
    AitPost {
        join_key: String,
        character_name: String,
        model: String,
        system_instructions: String,
        message_id: String,
        audio_voice: Option<String>,
        audio_model: Option<String>,
        audio_instructions: Option<String>,
    },
    /// Single-character conversation turn (`/conversation/postMessage`).
    /// The user message for `message_id` is already in the conversation.
    ConversationPost {
        conversation_key: String,
        message_id: String,
    },
    /// Stateless single-shot generation (`/generate`).
    Generate { model: String, prompt: String, message_id: String },
    /// Pure text-to-speech for an existing session, routed to the
    /// audio-only queue rather than the message queue (`/ait/generateAudio`).
    AudioGenerate {
        join_key: String,
        text: String,
        voice: String,
        model: String,
        message_id: String,
    },
    /// Stateless translation request, text in/out plus optional audio.
    Translation {
        session_key: String,
        model: String,
        text: String,
        target_language: String,
        message_id: String,
        audio_voice: Option<String>,
        audio_model: Option<String>,
    },
}

impl RequestKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AitPost { .. } => "ait_post",
            Self::ConversationPost { .. } => "conversation_post",
            Self::Generate { .. } => "generate",
            Self::AudioGenerate { .. } => "audio_generate",
            Self::Translation { .. } => "translation",
        }
    }
}

/// A unit of work submitted to the worker pool.
#[derive(Debug, Clone)]
pub struct Job {
    pub ip_address: String,
    pub kind: RequestKind,
}

impl Job {
    pub fn new(ip_address: String, kind: RequestKind) -> Self {
        Self { ip_address, kind }
    }
}
