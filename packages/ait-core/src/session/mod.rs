//! Session state: three independent registries — join-key sessions,
//! single-speaker conversations, and the single-shot generation cache.
//! None of these nest inside one another; see `state::AppState` for how
//! they're wired together.

pub mod archive;
pub mod conversation;
pub mod dialog;
pub mod generation;
pub mod session_store;

pub use conversation::{Conversation, ConversationStore};
pub use dialog::{now_secs, AssistantResponse, DialogTurn, Role, UserMessage};
pub use generation::{GenerationCache, GenerationEntry, GenerationStatus};
pub use session_store::{Session, SessionStore};
