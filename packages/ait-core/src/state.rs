//! Shared application state: the three dialog registries, provider
//! clients, rate limiter, worker pools, stream delivery, and the handles
//! every HTTP handler needs. Built once in `bootstrap` and shared behind
//! an `Arc` with every request handler and the reaper.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::llm_log::LlmLog;
use crate::providers::{ChatProvider, TtsProvider};
use crate::queue::WorkerPool;
use crate::rate_limiter::{IpSource, RateLimiter};
use crate::session::{ConversationStore, GenerationCache, SessionStore};
use crate::stream::{DirectStreamDelivery, StreamDelivery};

/// Everything a request handler or background task needs to service the
/// service's HTTP surface. Three independent registries — `sessions`,
/// `conversations`, `generations` — live here side by side; none of them
/// nests inside another.
pub struct AppState {
    pub config: Config,

    pub chat: Arc<ChatProvider>,
    pub tts: Option<Arc<TtsProvider>>,

    pub sessions: Arc<SessionStore>,
    pub conversations: Arc<ConversationStore>,
    pub generations: Arc<Mutex<GenerationCache>>,

    pub rate_limiter: Arc<RateLimiter>,
    pub ip_source: IpSource,

    pub message_workers: Arc<WorkerPool>,
    pub audio_workers: Arc<WorkerPool>,

    pub stream_delivery: Arc<dyn StreamDelivery>,
    /// Present only when Mode A (direct HTTP streaming) is active; the
    /// `/ait/stream-audio/{join_key}` handler needs the concrete type to
    /// call `listen`, which isn't part of the `StreamDelivery` trait.
    pub direct_stream: Option<Arc<DirectStreamDelivery>>,

    pub llm_log: Arc<LlmLog>,

    pub generated_audio_dir: PathBuf,
    pub fallback_audio_dir: PathBuf,
}

impl AppState {
    /// Whether a caller's usage should count against the rate limiter at
    /// all — `use_rate_limit: false` turns the whole mechanism off.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.config.server.usage.use_rate_limit
    }

    pub fn audio_configured(&self) -> bool {
        self.tts.is_some()
    }
}
