//! Generation pipeline: turns a queued [`Job`] into a chat reply, and
//! where audio is configured, a synthesized and tagged MP3 file, then
//! writes the result back into session state where the caller's poll
//! will find it.
//!
//! This is the single place that calls out to providers; `queue` only
//! moves jobs around, and `session` only stores state. Every `RequestKind`
//! funnels through [`GenerationPipeline::process`]. The HTTP handlers have
//! already inserted the user message into the session/conversation/cache
//! before the job reaches a worker — duplicate `message_id` rejection is a
//! synchronous 400, never something the pipeline retries.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AitResult;
use crate::llm_log::LlmLog;
use crate::pipeline::audio;
use crate::protocol_constants::SEQUENCE_DIGITS;
use crate::providers::{ChatProvider, TtsProvider};
use crate::queue::{Job, RequestKind};
use crate::rate_limiter::RateLimiter;
use crate::session::dialog::strip_character_prefix;
use crate::session::{AssistantResponse, ConversationStore, GenerationCache, SessionStore};
use crate::stream::StreamDelivery;

/// Where a finished job's audio file is written.
///
/// Named `<sequence>_<character>_<message_id>_<voice>_<uuid>.mp3` so
/// lexicographic order matches temporal order (`SEQUENCE_DIGITS`
/// zero-padded prefix) while still carrying enough in the name to debug a
/// mount directory by eye.
pub struct AudioSink {
    pub base_dir: PathBuf,
}

impl AudioSink {
    #[allow(clippy::too_many_arguments)]
    pub fn path_for(
        &self,
        join_key: &str,
        sequence: u64,
        character_name: &str,
        message_id: &str,
        voice: &str,
        uuid: &str,
    ) -> PathBuf {
        let character = sanitize_component(character_name);
        let voice = sanitize_component(voice);
        let message_id = sanitize_component(message_id);
        self.base_dir.join(join_key).join(format!(
            "{:0width$}_{character}_{message_id}_{voice}_{uuid}.mp3",
            sequence,
            width = SEQUENCE_DIGITS
        ))
    }
}

/// Audio filenames are embedded verbatim into a path; strip anything that
/// could escape the join key's directory or otherwise confuse a listing.
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Ties providers, session state, rate limiting, and audio post-processing
/// together to service one job at a time.
pub struct GenerationPipeline {
    pub chat: Arc<ChatProvider>,
    pub tts: Option<Arc<TtsProvider>>,
    pub sessions: Arc<SessionStore>,
    pub conversations: Arc<ConversationStore>,
    pub generations: Arc<Mutex<GenerationCache>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audio_sink: AudioSink,
    pub stream_delivery: Arc<dyn StreamDelivery>,
    pub llm_log: Arc<LlmLog>,
    pub audio_cost_per_second: f64,
}

impl GenerationPipeline {
    pub async fn process(&self, job: Job) {
        match job.kind {
            RequestKind::AitPost {
                join_key,
                character_name,
                model,
                system_instructions,
                message_id,
                audio_voice,
                audio_model,
                audio_instructions,
            } => {
                self.process_ait_post(
                    &job.ip_address,
                    &join_key,
                    &character_name,
                    &model,
                    &system_instructions,
                    &message_id,
                    audio_voice,
                    audio_model,
                    audio_instructions,
                )
                .await;
            }
            RequestKind::ConversationPost {
                conversation_key,
                message_id,
            } => {
                self.process_conversation_post(&job.ip_address, &conversation_key, &message_id)
                    .await;
            }
            RequestKind::Generate { model, prompt, message_id } => {
                self.process_generate(&job.ip_address, &model, &prompt, &message_id).await;
            }
            RequestKind::AudioGenerate {
                join_key,
                text,
                voice,
                model,
                message_id,
            } => {
                self.process_audio_generate(&job.ip_address, &join_key, &text, &voice, &model, &message_id)
                    .await;
            }
            RequestKind::Translation {
                session_key,
                model,
                text,
                target_language,
                message_id,
                audio_voice,
                audio_model,
            } => {
                self.process_translation(
                    &job.ip_address,
                    &session_key,
                    &model,
                    &text,
                    &target_language,
                    &message_id,
                    audio_voice,
                    audio_model,
                )
                .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_ait_post(
        &self,
        ip_address: &str,
        join_key: &str,
        character_name: &str,
        model: &str,
        system_instructions: &str,
        message_id: &str,
        audio_voice: Option<String>,
        audio_model: Option<String>,
        audio_instructions: Option<String>,
    ) {
        let Some(session) = self.sessions.get(join_key) else {
            log::error!("ait_post: session {join_key} vanished before worker picked up {message_id}");
            return;
        };

        let dialog = session.lock().dialog();

        let reply = match self.chat.dialog_reply(model, system_instructions, &dialog).await {
            Ok((text, usage)) => {
                self.rate_limiter.increment(ip_address, usage.weight);
                strip_character_prefix(&text, character_name)
            }
            Err(e) => {
                log::error!("ait_post chat failure for {join_key}/{character_name}: {e}");
                return;
            }
        };

        self.llm_log.record(&format!(
            "ait/postMessage join_key={join_key} character={character_name} model={model} reply={reply}"
        ));

        let mut response = AssistantResponse::new(reply.clone(), character_name.to_string(), message_id.to_string());

        if let Some(tts) = &self.tts {
            let voice = audio_voice.as_deref().unwrap_or_default();
            let tts_model = audio_model.as_deref().unwrap_or_default();
            let instructions = audio_instructions.as_deref().unwrap_or_default();
            let sequence = session.lock().next_sequence();
            match self
                .synthesize_and_tag(
                    tts,
                    &reply,
                    voice,
                    tts_model,
                    instructions,
                    join_key,
                    character_name,
                    message_id,
                    sequence,
                    ip_address,
                )
                .await
            {
                Ok(filename) => {
                    response.filename = Some(filename);
                    response.audio_ready_at = Some(crate::session::now_secs());
                }
                Err(e) => log::error!("ait_post audio synthesis failed for {join_key}: {e}"),
            }
        }

        session.lock().push_assistant_response(response);
    }

    async fn process_conversation_post(&self, ip_address: &str, conversation_key: &str, message_id: &str) {
        let Some(conversation) = self.conversations.get(conversation_key) else {
            log::error!("conversation_post: conversation {conversation_key} vanished before worker picked up {message_id}");
            return;
        };

        let (model, system_instructions, dialog) = {
            let guard = conversation.lock();
            (guard.model.clone(), guard.system_instructions.clone(), guard.dialog())
        };

        let reply = match self.chat.dialog_reply(&model, &system_instructions, &dialog).await {
            Ok((text, usage)) => {
                self.rate_limiter.increment(ip_address, usage.weight);
                text
            }
            Err(e) => {
                log::error!("conversation_post chat failure for {conversation_key}: {e}");
                return;
            }
        };

        self.llm_log
            .record(&format!("conversation/postMessage key={conversation_key} reply={reply}"));

        let response = AssistantResponse::new(reply, "assistant".to_string(), message_id.to_string());
        conversation.lock().push_assistant_response(response);
    }

    async fn process_generate(&self, ip_address: &str, model: &str, prompt: &str, message_id: &str) {
        match self.chat.generate(model, prompt).await {
            Ok((text, usage)) => {
                self.rate_limiter.increment(ip_address, usage.weight);
                self.llm_log.record(&format!("generate/postMessage message_id={message_id} reply={text}"));
                self.generations.lock().mark_ready(message_id, text, None);
            }
            Err(e) => {
                log::error!("generate failure for {message_id}: {e}");
                self.generations.lock().mark_failed(message_id, e.to_string());
            }
        }
    }

    /// `/ait/generateAudio`: synthesizes arbitrary text for an existing
    /// session without going through the chat provider, routed via the
    /// audio-only queue so a long TTS job never blocks short chat turns.
    async fn process_audio_generate(
        &self,
        ip_address: &str,
        join_key: &str,
        text: &str,
        voice: &str,
        model: &str,
        message_id: &str,
    ) {
        let Some(tts) = &self.tts else {
            log::error!("audio_generate {message_id}: no audio provider configured");
            self.generations
                .lock()
                .mark_failed(message_id, "no audio provider configured".to_string());
            return;
        };
        let Some(session) = self.sessions.get(join_key) else {
            log::error!("audio_generate: session {join_key} vanished before worker picked up {message_id}");
            return;
        };
        let sequence = session.lock().next_sequence();

        match self
            .synthesize_and_tag(tts, text, voice, model, "", join_key, "generateAudio", message_id, sequence, ip_address)
            .await
        {
            Ok(filename) => {
                self.llm_log
                    .record(&format!("ait/generateAudio join_key={join_key} message_id={message_id} filename={filename}"));
                self.generations.lock().mark_ready(message_id, text.to_string(), Some(filename));
            }
            Err(e) => {
                log::error!("audio_generate failed for {join_key}/{message_id}: {e}");
                self.generations.lock().mark_failed(message_id, e.to_string());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_translation(
        &self,
        ip_address: &str,
        session_key: &str,
        model: &str,
        text: &str,
        target_language: &str,
        message_id: &str,
        audio_voice: Option<String>,
        audio_model: Option<String>,
    ) {
        let prompt = format!("Translate the following text to {target_language}:\n\n{text}");
        let translated = match self.chat.generate(model, &prompt).await {
            Ok((translated, usage)) => {
                self.rate_limiter.increment(ip_address, usage.weight);
                translated.trim().to_string()
            }
            Err(e) => {
                log::error!("translation failure for {message_id}: {e}, falling back to source text");
                text.to_string()
            }
        };

        self.llm_log
            .record(&format!("translation message_id={message_id} target={target_language} reply={translated}"));

        let mut filename = None;
        if let Some(tts) = &self.tts {
            let voice = audio_voice.as_deref().unwrap_or_default();
            let tts_model = audio_model.as_deref().unwrap_or_default();
            let sequence = self
                .sessions
                .get_or_create(session_key)
                .0
                .lock()
                .next_sequence();
            match self
                .synthesize_and_tag(
                    tts,
                    &translated,
                    voice,
                    tts_model,
                    "",
                    session_key,
                    "translation",
                    message_id,
                    sequence,
                    ip_address,
                )
                .await
            {
                Ok(name) => filename = Some(name),
                Err(e) => log::error!("translation audio synthesis failed for {session_key}: {e}"),
            }
        }

        self.generations.lock().mark_ready(message_id, translated, filename);
    }

    #[allow(clippy::too_many_arguments)]
    async fn synthesize_and_tag(
        &self,
        tts: &Arc<TtsProvider>,
        text: &str,
        voice: &str,
        model: &str,
        _instructions: &str,
        join_key: &str,
        character_name: &str,
        message_id: &str,
        sequence: u64,
        ip_address: &str,
    ) -> AitResult<String> {
        let raw = tts.synthesize(model, voice, text).await?;
        let reencoded = audio::reencode_mp3(&raw)?;

        let uuid = uuid::Uuid::new_v4().to_string();
        let path = self.audio_sink.path_for(join_key, sequence, character_name, message_id, voice, &uuid);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::AitError::Internal(format!("creating {}: {e}", parent.display())))?;
        }
        std::fs::write(&path, &reencoded)
            .map_err(|e| crate::error::AitError::Internal(format!("writing {}: {e}", path.display())))?;

        audio::write_id3_tags(&path, join_key, character_name)?;

        let duration_secs = audio::probe_duration_secs(&path).unwrap_or(0.0);
        self.rate_limiter.increment(ip_address, duration_secs * self.audio_cost_per_second);

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        self.stream_delivery.on_new_file(join_key, &filename).await;

        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_sink_path_zero_pads_sequence_and_embeds_fields() {
        let sink = AudioSink { base_dir: PathBuf::from("/tmp/audio") };
        let path = sink.path_for("room1", 7, "Nyx", "m1", "alloy", "abc-123");
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "007_Nyx_m1_alloy_abc-123.mp3");
    }

    #[test]
    fn sanitize_component_replaces_path_separators() {
        assert_eq!(sanitize_component("../etc"), "___etc");
        assert_eq!(sanitize_component(""), "_");
    }
}
