use std::path::Path;
use std::time::Duration;

use orchestrator::config::{
    DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_MAX_RESUBMISSIONS, DEFAULT_MIN_SUCCESS_RATIO,
};
use orchestrator::PipelineConfig;
use provider::anthropic::AnthropicConfig;
use provider::RetryPolicy;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

pub const CONFIG_DIR: &str = ".hookline";
pub const CONFIG_FILE: &str = ".hookline/config.toml";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DATABASE_URL: &str = "sqlite:.hookline/hookline.db";
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub database_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// Provider settings; unset values fall back to the client defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ttl_secs: Option<u64>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            max_tokens: None,
            request_timeout_secs: None,
            thread_ttl_secs: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub min_success_ratio: f64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub batch_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_context_chars: usize,
    pub auto_resubmit_missing: bool,
    pub max_resubmissions: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            min_success_ratio: DEFAULT_MIN_SUCCESS_RATIO,
            max_attempts: defaults.retry.max_attempts,
            initial_backoff_ms: defaults.retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: defaults.retry.max_backoff.as_millis() as u64,
            batch_timeout_secs: defaults.batch_timeout.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            auto_resubmit_missing: false,
            max_resubmissions: DEFAULT_MAX_RESUBMISSIONS,
        }
    }
}

/// Application configuration stored in .hookline/config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HooklineConfig {
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub pipeline: PipelineSettings,
}

impl HooklineConfig {
    /// Read the config file, falling back to defaults when it is missing or
    /// unreadable.
    pub async fn read(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path).await {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content).await?;
        debug!(path = %path.display(), "Config saved successfully");
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig::default()
            .with_min_success_ratio(p.min_success_ratio)
            .with_retry(RetryPolicy {
                max_attempts: p.max_attempts.max(1),
                initial_backoff: Duration::from_millis(p.initial_backoff_ms),
                max_backoff: Duration::from_millis(p.max_backoff_ms),
            })
            .with_batch_timeout(Duration::from_secs(p.batch_timeout_secs))
            .with_poll_interval(Duration::from_secs(p.poll_interval_secs.max(1)))
            .with_max_context_chars(p.max_context_chars)
            .with_auto_resubmit(p.auto_resubmit_missing, p.max_resubmissions)
    }

    /// Client settings for `api_key`, with unset values left at their defaults.
    pub fn anthropic_config(&self, api_key: impl Into<String>) -> AnthropicConfig {
        let p = &self.provider;
        let mut config = AnthropicConfig::new(api_key);
        if let Some(base_url) = &p.base_url {
            config = config.with_base_url(base_url.as_str());
        }
        if let Some(model) = &p.model {
            config = config.with_model(model.as_str());
        }
        if let Some(max_tokens) = p.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        if let Some(secs) = p.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = p.thread_ttl_secs {
            config = config.with_thread_ttl(Duration::from_secs(secs));
        }
        config
    }

    /// The API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = HooklineConfig::read(&temp_dir.path().join("config.toml")).await;
        assert_eq!(config, HooklineConfig::default());
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.provider.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[pipeline]\nmin_success_ratio = 0.75\nauto_resubmit_missing = true\n\n[provider]\nmodel = \"claude-haiku-4-5\"\n",
        )
        .unwrap();

        let config = HooklineConfig::read(&path).await;
        assert_eq!(config.pipeline.min_success_ratio, 0.75);
        assert!(config.pipeline.auto_resubmit_missing);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.server.port, DEFAULT_PORT);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.min_success_ratio, 0.75);
        assert!(pipeline.auto_resubmit_missing);

        let client = config.anthropic_config("key");
        assert_eq!(client.model, "claude-haiku-4-5");
        assert_eq!(client.base_url, "https://api.anthropic.com");
    }

    #[tokio::test]
    async fn test_unparseable_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let config = HooklineConfig::read(&path).await;
        assert_eq!(config, HooklineConfig::default());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".hookline").join("config.toml");

        let mut config = HooklineConfig::default();
        config.server.port = 4100;
        config.pipeline.poll_interval_secs = 15;
        config.write(&path).await.unwrap();

        let loaded = HooklineConfig::read(&path).await;
        assert_eq!(loaded, config);
        assert_eq!(loaded.pipeline_config().poll_interval, Duration::from_secs(15));
    }
}
