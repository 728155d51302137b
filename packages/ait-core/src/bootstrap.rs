//! Composition root: wires configuration into provider clients, the
//! three dialog registries, rate limiting, both worker pools and the
//! generation pipeline, stream delivery, and the reaper.
//!
//! Startup catalog validation (configured models/voices against what each
//! provider actually serves) runs here, after the provider clients exist
//! but before the server binds a listener — a mismatch is a fatal
//! [`crate::error::AitError::Configuration`], not something discovered on
//! the first request.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ClientMode, Config};
use crate::error::{AitError, AitResult};
use crate::llm_log::LlmLog;
use crate::pipeline::{AudioSink, GenerationPipeline};
use crate::providers::{validate_catalog, ChatProvider, TtsProvider};
use crate::queue::{Job, JobHandler, WorkerPool};
use crate::rate_limiter::{IpSource, RateLimiter};
use crate::reaper::Reaper;
use crate::runtime::TaskSpawner;
use crate::session::{ConversationStore, GenerationCache, SessionStore};
use crate::state::AppState;
use crate::stream::{BroadcasterStreamDelivery, DirectStreamDelivery, StreamDelivery};

/// Default bound on each worker pool's in-flight job queue. Past this,
/// ingress sheds load with `AitError::Busy` rather than growing memory
/// unboundedly under sustained overload.
const QUEUE_CAPACITY: usize = 256;

fn build_chat_provider(config: &Config) -> AitResult<ChatProvider> {
    match config.chat_client.mode {
        ClientMode::Hosted => {
            let api_key = match &config.chat_client.key_file {
                Some(path) => Config::read_key_file(path)?,
                None => {
                    return Err(AitError::Configuration(
                        "chat_client.key_file is required in hosted mode".into(),
                    ))
                }
            };
            Ok(ChatProvider::hosted(api_key, config.chat_client.base_url.clone()))
        }
        ClientMode::SelfHosted => {
            let base_url = config.chat_client.base_url.clone().ok_or_else(|| {
                AitError::Configuration("chat_client.base_url is required in self-hosted mode".into())
            })?;
            ChatProvider::self_hosted(base_url)
        }
    }
}

fn build_tts_provider(config: &Config) -> AitResult<Option<TtsProvider>> {
    let Some(audio_client) = &config.audio_client else {
        return Ok(None);
    };
    match audio_client.mode {
        ClientMode::Hosted => {
            let api_key = match &audio_client.key_file {
                Some(path) => Config::read_key_file(path)?,
                None => {
                    return Err(AitError::Configuration(
                        "audio_client.key_file is required in hosted mode".into(),
                    ))
                }
            };
            Ok(Some(TtsProvider::hosted(api_key)))
        }
        ClientMode::SelfHosted => {
            let base_url = audio_client.base_url.clone().ok_or_else(|| {
                AitError::Configuration("audio_client.base_url is required in self-hosted mode".into())
            })?;
            Ok(Some(TtsProvider::self_hosted(base_url)))
        }
    }
}

/// Validates configured chat/audio allow-lists against each provider's
/// live catalog. Self-hosted TTS servers have no standard discovery
/// endpoint, so their configured allow-list is trusted outright rather
/// than cross-checked (`TtsProvider::trusts_configured_catalog`).
async fn validate_startup_catalogs(config: &Config, chat: &ChatProvider, tts: Option<&TtsProvider>) -> AitResult<()> {
    let available_chat_models = chat.available_models().await?;

    let (available_audio_models, available_audio_voices) = match tts {
        Some(tts) if tts.trusts_configured_catalog() => {
            let audio_client = config.audio_client.as_ref().expect("tts configured implies audio_client");
            (audio_client.allowed_models.clone(), audio_client.allowed_voices.clone())
        }
        Some(tts) => (tts.available_models(), tts.available_voices()),
        None => (Vec::new(), Vec::new()),
    };

    let audio_client = config.audio_client.as_ref();
    let report = validate_catalog(
        &config.chat_client.allowed_models,
        &available_chat_models,
        &config.chat_client.default_model,
        audio_client.map(|c| c.allowed_models.as_slice()).unwrap_or(&[]),
        &available_audio_models,
        audio_client.map(|c| c.allowed_voices.as_slice()).unwrap_or(&[]),
        &available_audio_voices,
        audio_client.map(|c| c.default_voice.as_str()).unwrap_or(""),
        tts.is_some(),
    )?;

    if !report.is_valid() {
        return Err(AitError::Configuration(format!(
            "catalog validation failed: invalid_chat_models={:?} invalid_audio_models={:?} invalid_audio_voices={:?} default_chat_model_available={} default_audio_voice_available={}",
            report.invalid_chat_models,
            report.invalid_audio_models,
            report.invalid_audio_voices,
            report.default_chat_model_available,
            report.default_audio_voice_available
        )));
    }
    Ok(())
}

/// Builds the configured delivery backend. Also returns the concrete
/// [`DirectStreamDelivery`] handle when Mode A is active — the
/// `/ait/stream-audio/{join_key}` handler needs it directly since `listen`
/// isn't part of the `StreamDelivery` trait object.
fn build_stream_delivery(
    config: &Config,
    sessions: Arc<SessionStore>,
) -> (Arc<dyn StreamDelivery>, Option<Arc<DirectStreamDelivery>>) {
    match &config.broadcaster_control {
        Some(broadcaster) => {
            let delivery = Arc::new(BroadcasterStreamDelivery::new(
                broadcaster.host.clone(),
                broadcaster.http_port,
                config.admin_stats.clone(),
            ));
            (delivery, None)
        }
        None => {
            let active_dir = config.aitalkmaster.generated_audio_dir.join("active");
            let fallback_dir = config.aitalkmaster.audio_fallback_dir.clone();
            let direct = Arc::new(DirectStreamDelivery::new(sessions, active_dir, fallback_dir));
            (direct.clone() as Arc<dyn StreamDelivery>, Some(direct))
        }
    }
}

/// Builds the fully-wired application state. Fails fast (before the
/// server starts accepting traffic) on any configuration or provider
/// catalog mismatch.
pub async fn bootstrap(config: Config) -> AitResult<Arc<AppState>> {
    let chat = build_chat_provider(&config)?;
    let tts = build_tts_provider(&config)?;

    validate_startup_catalogs(&config, &chat, tts.as_ref()).await?;

    let chat = Arc::new(chat);
    let tts = tts.map(Arc::new);

    let sessions = Arc::new(SessionStore::new());
    let conversations = Arc::new(ConversationStore::new());
    let generations = Arc::new(Mutex::new(GenerationCache::new()));

    let rate_limiter = Arc::new(RateLimiter::new(config.server.usage.rate_limit_per_day));
    let ip_source = if config.server.usage.rate_limit_x_forwarded_for {
        IpSource::XForwardedFor
    } else {
        IpSource::PeerAddress
    };

    let llm_log = Arc::new(
        LlmLog::open(config.server.llm_log_file.clone())
            .map_err(|e| AitError::Configuration(format!("opening llm log: {e}")))?,
    );

    let audio_sink = AudioSink {
        base_dir: config.aitalkmaster.generated_audio_dir.join("active"),
    };

    let (stream_delivery, direct_stream) = build_stream_delivery(&config, sessions.clone());

    let pipeline = Arc::new(GenerationPipeline {
        chat: chat.clone(),
        tts: tts.clone(),
        sessions: sessions.clone(),
        conversations: conversations.clone(),
        generations: generations.clone(),
        rate_limiter: rate_limiter.clone(),
        audio_sink,
        stream_delivery: stream_delivery.clone(),
        llm_log: llm_log.clone(),
        audio_cost_per_second: config.server.usage.audio_cost_per_second,
    });

    let handler: JobHandler = {
        let pipeline = pipeline.clone();
        Arc::new(move |job: Job| {
            let pipeline = pipeline.clone();
            Box::pin(async move { pipeline.process(job).await })
        })
    };

    let message_workers = Arc::new(WorkerPool::spawn(config.server.num_workers, QUEUE_CAPACITY, handler.clone()));
    let audio_workers = Arc::new(WorkerPool::spawn(config.server.num_audio_workers, QUEUE_CAPACITY, handler));

    let state = Arc::new(AppState {
        generated_audio_dir: config.aitalkmaster.generated_audio_dir.clone(),
        fallback_audio_dir: config.aitalkmaster.audio_fallback_dir.clone(),
        config,
        chat,
        tts,
        sessions,
        conversations,
        generations,
        rate_limiter,
        ip_source,
        message_workers,
        audio_workers,
        stream_delivery,
        direct_stream,
        llm_log,
    });

    Ok(state)
}

/// Spawns the reaper's periodic reconciliation tick against an already
/// bootstrapped `AppState`. Separate from `bootstrap` so tests can build
/// state without a background task running against it.
pub fn spawn_reaper(state: &Arc<AppState>, spawner: &dyn TaskSpawner) {
    let reaper = Reaper {
        sessions: state.sessions.clone(),
        stream_delivery: state.stream_delivery.clone(),
        generated_audio_dir: state.generated_audio_dir.clone(),
        keep_alive: state.config.aitalkmaster.join_key_keep_alive_list.clone(),
        tick_period: crate::protocol_constants::REAPER_PERIOD,
        retention_horizon: crate::protocol_constants::RETENTION_HORIZON,
    };
    reaper.spawn(spawner);
}
