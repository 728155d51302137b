//! Application configuration.
//!
//! Mirrors the recognized YAML option tree: server/usage, chat client,
//! audio client, broadcaster control, admin stats, and aitalkmaster-specific
//! settings. Loaded once at startup; startup validation of model/voice
//! allow-lists against the live provider catalogs happens in `bootstrap`
//! once the provider clients exist.

use std::path::PathBuf;

use serde::Deserialize;

/// Selects between a hosted (external API) and self-hosted provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    Hosted,
    #[serde(rename = "self-hosted")]
    SelfHosted,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub use_rate_limit: bool,
    pub rate_limit_x_forwarded_for: bool,
    pub rate_limit_per_day: f64,
    pub audio_cost_per_second: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            use_rate_limit: true,
            rate_limit_x_forwarded_for: false,
            rate_limit_per_day: 100_000.0,
            audio_cost_per_second: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_file: Option<PathBuf>,
    pub llm_log_file: Option<PathBuf>,
    pub num_workers: usize,
    pub num_audio_workers: usize,
    pub usage: UsageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_file: None,
            llm_log_file: None,
            num_workers: 4,
            num_audio_workers: 2,
            usage: UsageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatClientConfig {
    pub mode: ClientMode,
    pub key_file: Option<PathBuf>,
    pub base_url: Option<String>,
    pub default_model: String,
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioClientConfig {
    pub mode: ClientMode,
    pub key_file: Option<PathBuf>,
    pub base_url: Option<String>,
    pub default_voice: String,
    pub default_model: String,
    #[serde(default)]
    pub allowed_voices: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcasterControlConfig {
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminStatsConfig {
    pub host: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub stream_endpoint_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AitalkmasterConfig {
    pub join_key_keep_alive_list: Vec<String>,
    pub audio_fallback_dir: PathBuf,
    pub generated_audio_dir: PathBuf,
}

impl Default for AitalkmasterConfig {
    fn default() -> Self {
        Self {
            join_key_keep_alive_list: Vec::new(),
            audio_fallback_dir: PathBuf::from("fallback-audio"),
            generated_audio_dir: PathBuf::from("generated-audio"),
        }
    }
}

/// Top-level application configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub chat_client: ChatClientConfig,
    pub audio_client: Option<AudioClientConfig>,
    pub broadcaster_control: Option<BroadcasterControlConfig>,
    pub admin_stats: Option<AdminStatsConfig>,
    #[serde(default)]
    pub aitalkmaster: AitalkmasterConfig,
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> Result<Self, crate::error::AitError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AitError::Configuration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            crate::error::AitError::Configuration(format!(
                "failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Reads and validates an API key file for a hosted provider.
    ///
    /// Fails if the file is missing, empty, or is a directory.
    pub fn read_key_file(path: &std::path::Path) -> Result<String, crate::error::AitError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            crate::error::AitError::Configuration(format!(
                "key file {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        if metadata.is_dir() {
            return Err(crate::error::AitError::Configuration(format!(
                "key file {} is a directory",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AitError::Configuration(format!(
                "failed to read key file {}: {}",
                path.display(),
                e
            ))
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(crate::error::AitError::Configuration(format!(
                "key file {} is empty",
                path.display()
            )));
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_config_default_enables_rate_limit() {
        let usage = UsageConfig::default();
        assert!(usage.use_rate_limit);
        assert_eq!(usage.rate_limit_per_day, 100_000.0);
    }

    #[test]
    fn server_config_default_worker_counts() {
        let server = ServerConfig::default();
        assert_eq!(server.num_workers, 4);
        assert_eq!(server.num_audio_workers, 2);
    }

    #[test]
    fn read_key_file_rejects_missing_file() {
        let result = Config::read_key_file(std::path::Path::new("/nonexistent/key.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn read_key_file_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.txt");
        std::fs::write(&path, "   \n").unwrap();
        assert!(Config::read_key_file(&path).is_err());
    }

    #[test]
    fn read_key_file_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.txt");
        std::fs::write(&path, "sk-abc123\n").unwrap();
        assert_eq!(Config::read_key_file(&path).unwrap(), "sk-abc123");
    }
}
