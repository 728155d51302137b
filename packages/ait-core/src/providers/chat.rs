//! Chat provider client: hosted (OpenAI-compatible) or self-hosted (Ollama).
//!
//! Both directions expose the same two shapes a caller needs: a
//! multi-turn dialog reply (used by the AIT pipeline and the
//! one-on-one/CONVERSATION pipeline) and a single-shot completion (used
//! by GENERATE and TRANSLATION). The self-hosted single-shot path reads
//! Ollama's `/api/generate` response field (`response`), not the
//! dialog-style `message.content` field — the two endpoints are distinct
//! and return differently shaped payloads.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client as OpenAiClient;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;

use crate::error::{AitError, AitResult};
use crate::session::{DialogTurn, Role};

/// Token or eval-count usage reported by the provider, charged against the
/// caller's rate-limit budget.
pub struct ChatUsage {
    pub weight: f64,
}

/// A chat completion client, either hosted or self-hosted.
pub enum ChatProvider {
    Hosted {
        client: OpenAiClient<OpenAIConfig>,
    },
    SelfHosted {
        client: Ollama,
    },
}

impl ChatProvider {
    pub fn hosted(api_key: String, base_url: Option<String>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = base_url {
            config = config.with_api_base(base_url);
        }
        Self::Hosted {
            client: OpenAiClient::with_config(config),
        }
    }

    pub fn self_hosted(base_url: String) -> AitResult<Self> {
        let client = Ollama::try_new(base_url.clone())
            .map_err(|e| AitError::Configuration(format!("invalid chat base_url {base_url}: {e}")))?;
        Ok(Self::SelfHosted { client })
    }

    /// Sends a full dialog and returns the raw reply text plus usage weight.
    ///
    /// The caller is responsible for stripping any leading character-name
    /// prefix the model echoes back (`dialog::strip_character_prefix`).
    pub async fn dialog_reply(
        &self,
        model: &str,
        system_instructions: &str,
        dialog: &[DialogTurn],
    ) -> AitResult<(String, ChatUsage)> {
        match self {
            Self::Hosted { client } => {
                let mut messages: Vec<ChatCompletionRequestMessage> = vec![
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(system_instructions)
                        .build()
                        .map_err(|e| AitError::Internal(e.to_string()))?
                        .into(),
                ];
                for turn in dialog {
                    let content = format!("{}: {}", turn.speaker, turn.content);
                    messages.push(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| AitError::Internal(e.to_string()))?
                            .into(),
                    );
                }

                let request = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .messages(messages)
                    .build()
                    .map_err(|e| AitError::Internal(e.to_string()))?;

                let response = client
                    .chat()
                    .create(request)
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;

                let text = response
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .ok_or_else(|| AitError::ProviderFailure("empty chat completion".into()))?;

                let weight = response
                    .usage
                    .as_ref()
                    .map(|u| u.total_tokens as f64)
                    .unwrap_or(0.0);

                Ok((text, ChatUsage { weight }))
            }
            Self::SelfHosted { client } => {
                let mut messages = vec![ChatMessage::system(system_instructions.to_string())];
                for turn in dialog {
                    let content = format!("{}: {}", turn.speaker, turn.content);
                    messages.push(match turn.role {
                        Role::User => ChatMessage::user(content),
                        Role::Assistant => ChatMessage::assistant(content),
                    });
                }

                let request = ChatMessageRequest::new(model.to_string(), messages);
                let response = client
                    .send_chat_messages(request)
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;

                let text = response.message.content;
                let weight = response.final_data.map(|d| d.eval_count as f64).unwrap_or(0.0);

                Ok((text, ChatUsage { weight }))
            }
        }
    }

    /// Single-shot completion for GENERATE/TRANSLATION requests, with no
    /// conversational history.
    pub async fn generate(&self, model: &str, prompt: &str) -> AitResult<(String, ChatUsage)> {
        match self {
            Self::Hosted { client } => {
                let messages: Vec<ChatCompletionRequestMessage> = vec![
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(prompt)
                        .build()
                        .map_err(|e| AitError::Internal(e.to_string()))?
                        .into(),
                ];
                let request = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .messages(messages)
                    .build()
                    .map_err(|e| AitError::Internal(e.to_string()))?;

                let response = client
                    .chat()
                    .create(request)
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;

                let text = response
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .ok_or_else(|| AitError::ProviderFailure("empty chat completion".into()))?;

                let weight = response
                    .usage
                    .as_ref()
                    .map(|u| u.total_tokens as f64)
                    .unwrap_or(0.0);

                Ok((text, ChatUsage { weight }))
            }
            Self::SelfHosted { client } => {
                let request = GenerationRequest::new(model.to_string(), prompt.to_string());
                let response = client
                    .generate(request)
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;

                // Ollama's generate endpoint returns the completion under
                // `response`, unlike the chat endpoint's `message.content`.
                let text = response.response;
                let weight = response.final_data.map(|d| d.eval_count as f64).unwrap_or(0.0);

                Ok((text, ChatUsage { weight }))
            }
        }
    }

    /// Live model catalog from the provider, used at startup to validate
    /// the configured allow-list and default model actually exist.
    pub async fn available_models(&self) -> AitResult<Vec<String>> {
        match self {
            Self::Hosted { client } => {
                let response = client
                    .models()
                    .list()
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;
                Ok(response.data.into_iter().map(|m| m.id).collect())
            }
            Self::SelfHosted { client } => {
                let models = client
                    .list_local_models()
                    .await
                    .map_err(|e| AitError::ProviderFailure(e.to_string()))?;
                Ok(models.into_iter().map(|m| m.name).collect())
            }
        }
    }
}
