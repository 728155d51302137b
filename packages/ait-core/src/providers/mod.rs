//! Chat and text-to-speech provider clients, plus startup catalog validation.

pub mod catalog;
pub mod chat;
pub mod tts;

pub use catalog::{validate as validate_catalog, CatalogReport};
pub use chat::{ChatProvider, ChatUsage};
pub use tts::TtsProvider;
