//! Startup validation of configured models and voices against the live
//! provider catalog.
//!
//! Run once during bootstrap, after the provider clients exist but before
//! the server starts accepting traffic. A mismatch between the
//! allow-listed models/voices in configuration and what the provider
//! actually serves is a fatal configuration error — better to fail fast
//! at startup than to discover it on the first request.

use crate::error::{AitError, AitResult};

#[derive(Debug, Clone)]
pub struct CatalogReport {
    pub invalid_chat_models: Vec<String>,
    pub invalid_audio_models: Vec<String>,
    pub invalid_audio_voices: Vec<String>,
    pub default_chat_model_available: bool,
    pub default_audio_voice_available: bool,
}

impl CatalogReport {
    pub fn is_valid(&self) -> bool {
        self.invalid_chat_models.is_empty()
            && self.invalid_audio_models.is_empty()
            && self.invalid_audio_voices.is_empty()
            && self.default_chat_model_available
            && self.default_audio_voice_available
    }
}

/// Checks `allowed` against `available`, returning the subset of `allowed`
/// that does not appear in `available`.
pub fn invalid_entries(allowed: &[String], available: &[String]) -> Vec<String> {
    allowed
        .iter()
        .filter(|m| !available.contains(m))
        .cloned()
        .collect()
}

/// Builds a `CatalogReport` from allow-lists and the catalogs fetched from
/// the live chat and audio providers, failing fast (as a configuration
/// error) if an allow-list is configured but empty.
pub fn validate(
    allowed_chat_models: &[String],
    available_chat_models: &[String],
    default_chat_model: &str,
    allowed_audio_models: &[String],
    available_audio_models: &[String],
    allowed_audio_voices: &[String],
    available_audio_voices: &[String],
    default_audio_voice: &str,
    audio_configured: bool,
) -> AitResult<CatalogReport> {
    if allowed_chat_models.is_empty() {
        return Err(AitError::Configuration(
            "no chat models configured to validate".into(),
        ));
    }

    let invalid_chat_models = invalid_entries(allowed_chat_models, available_chat_models);
    let default_chat_model_available = available_chat_models.iter().any(|m| m == default_chat_model);

    let (invalid_audio_models, invalid_audio_voices, default_audio_voice_available) = if audio_configured {
        if allowed_audio_models.is_empty() {
            return Err(AitError::Configuration(
                "no audio models configured to validate".into(),
            ));
        }
        if allowed_audio_voices.is_empty() {
            return Err(AitError::Configuration(
                "no audio voices configured to validate".into(),
            ));
        }
        (
            invalid_entries(allowed_audio_models, available_audio_models),
            invalid_entries(allowed_audio_voices, available_audio_voices),
            available_audio_voices.iter().any(|v| v == default_audio_voice),
        )
    } else {
        (Vec::new(), Vec::new(), true)
    };

    Ok(CatalogReport {
        invalid_chat_models,
        invalid_audio_models,
        invalid_audio_voices,
        default_chat_model_available,
        default_audio_voice_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn invalid_entries_finds_unavailable_models() {
        let allowed = strings(&["llama3.2", "mistral"]);
        let available = strings(&["llama3.2"]);
        assert_eq!(invalid_entries(&allowed, &available), vec!["mistral"]);
    }

    #[test]
    fn validate_rejects_empty_allowed_chat_models() {
        let result = validate(&[], &[], "llama3.2", &[], &[], &[], &[], "alloy", false);
        assert!(result.is_err());
    }

    #[test]
    fn validate_passes_when_everything_available() {
        let chat_allowed = strings(&["llama3.2"]);
        let chat_available = strings(&["llama3.2", "mistral"]);
        let audio_allowed = strings(&["tts-1"]);
        let audio_available = strings(&["tts-1"]);
        let voices_allowed = strings(&["alloy"]);
        let voices_available = strings(&["alloy", "nova"]);

        let report = validate(
            &chat_allowed,
            &chat_available,
            "llama3.2",
            &audio_allowed,
            &audio_available,
            &voices_allowed,
            &voices_available,
            "alloy",
            true,
        )
        .unwrap();

        assert!(report.is_valid());
    }

    #[test]
    fn validate_flags_missing_default_voice() {
        let chat_allowed = strings(&["llama3.2"]);
        let audio_allowed = strings(&["tts-1"]);
        let voices_allowed = strings(&["alloy"]);

        let report = validate(
            &chat_allowed,
            &chat_allowed,
            "llama3.2",
            &audio_allowed,
            &audio_allowed,
            &voices_allowed,
            &voices_allowed,
            "nonexistent-voice",
            true,
        )
        .unwrap();

        assert!(!report.default_audio_voice_available);
        assert!(!report.is_valid());
    }
}
