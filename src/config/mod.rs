use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub transcription: TranscriptionProviderConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL of the object storage gateway.
    pub base_url: String,
    /// Bearer token for the gateway, if it requires one.
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionProviderConfig {
    pub api_key: String,
    pub api_endpoint: Option<String>,
    /// Seconds between status polls while a job is running.
    pub poll_interval_seconds: u64,
    /// Maximum time to wait for a transcription job (default: 3600 = 1 hour).
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry budget per task before escalation.
    pub max_retries: u32,
    /// Minimum seconds a task must sit in failed state before a sweep
    /// will pick it up (default: 300 = 5 minutes).
    pub cooldown_seconds: u64,
    /// Seconds between sweep passes.
    pub sweep_interval_seconds: u64,
    /// Spacing between successive re-enqueues within one sweep, to avoid
    /// bursting the transcription provider.
    pub requeue_spacing_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent pipeline workers.
    pub concurrency: usize,
    pub queue_capacity: usize,
    /// Override the sqlite database location.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving escalation payloads when a task exhausts its
    /// retry budget. Escalations are logged only when unset.
    pub webhook_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            auth_token: None,
        }
    }
}

impl Default for TranscriptionProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: None,
            poll_interval_seconds: 3,
            timeout_seconds: 3600,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            cooldown_seconds: 300,
            sweep_interval_seconds: 60,
            requeue_spacing_seconds: 30,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 64,
            db_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_retry_policy() {
        let config = Config::default();
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.cooldown_seconds, 300);
        assert_eq!(config.retry.requeue_spacing_seconds, 30);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transcription]
            api_key = "key-123"

            [retry]
            max_retries = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.transcription.api_key, "key-123");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.cooldown_seconds, 300);
        assert_eq!(config.worker.concurrency, 4);
    }
}
