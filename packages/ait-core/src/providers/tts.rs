//! Text-to-speech provider client: hosted or self-hosted, both speaking
//! the OpenAI `audio.speech` wire shape (self-hosted targets are typically
//! an OpenAI-compatible server such as Kokoro).

use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateSpeechRequestArgs, SpeechModel, Voice};
use async_openai::Client as OpenAiClient;

use crate::error::{AitError, AitResult};

/// A text-to-speech client, either hosted or self-hosted.
pub enum TtsProvider {
    Hosted { client: OpenAiClient<OpenAIConfig> },
    SelfHosted { client: OpenAiClient<OpenAIConfig> },
}

impl TtsProvider {
    pub fn hosted(api_key: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self::Hosted {
            client: OpenAiClient::with_config(config),
        }
    }

    /// Self-hosted TTS servers (Kokoro and similar) accept any non-empty
    /// bearer value.
    pub fn self_hosted(base_url: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key("kokoro")
            .with_api_base(base_url);
        Self::SelfHosted {
            client: OpenAiClient::with_config(config),
        }
    }

    /// Synthesizes `text` and returns raw MP3 bytes as returned by the
    /// provider, before the pipeline's own 192kbps re-encode pass.
    pub async fn synthesize(&self, model: &str, voice: &str, text: &str) -> AitResult<Vec<u8>> {
        let client = match self {
            Self::Hosted { client } | Self::SelfHosted { client } => client,
        };

        let request = CreateSpeechRequestArgs::default()
            .model(SpeechModel::Other(model.to_string()))
            .voice(Voice::Other(voice.to_string()))
            .input(text)
            .response_format(async_openai::types::SpeechResponseFormat::Mp3)
            .speed(1.0)
            .build()
            .map_err(|e| AitError::Internal(e.to_string()))?;

        let response = client
            .audio()
            .speech(request)
            .await
            .map_err(|e| AitError::ProviderFailure(e.to_string()))?;

        Ok(response.bytes.to_vec())
    }

    /// Models available for validation at startup. OpenAI has no
    /// dedicated "speech models" listing endpoint, so the hosted catalog
    /// is the fixed set of models the `audio.speech` API documents;
    /// self-hosted servers (Kokoro and similar) have no standard
    /// discovery endpoint either, so their configured allow-list is
    /// trusted as-is rather than cross-checked against a live catalog.
    pub fn available_models(&self) -> Vec<String> {
        match self {
            Self::Hosted { .. } => vec!["tts-1".to_string(), "tts-1-hd".to_string(), "gpt-4o-mini-tts".to_string()],
            Self::SelfHosted { .. } => Vec::new(),
        }
    }

    /// Voices available for validation at startup, same hosted/self-hosted
    /// split as [`Self::available_models`].
    pub fn available_voices(&self) -> Vec<String> {
        match self {
            Self::Hosted { .. } => [
                "alloy", "ash", "ballad", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer", "verse",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            Self::SelfHosted { .. } => Vec::new(),
        }
    }

    pub fn trusts_configured_catalog(&self) -> bool {
        matches!(self, Self::SelfHosted { .. })
    }
}
