use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GmailError, Result};

/// Largest page the Gmail list endpoints accept
pub const MAX_PAGE_SIZE: u32 = 500;
/// Largest id list accepted by batchModify / batchDelete
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,
    #[serde(default = "default_refresh_token_path")]
    pub refresh_token_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_cache_path: default_token_cache_path(),
            refresh_token_path: default_refresh_token_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Cap on items accumulated by one exhaustive fetch
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub include_spam_trash: bool,
    /// Fixed pause between successive page requests
    #[serde(default)]
    pub page_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_results: None,
            include_spam_trash: false,
            page_delay_ms: 0,
        }
    }
}

impl FetchConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_units_per_second")]
    pub units_per_second: f64,
    #[serde(default = "default_burst_units")]
    pub burst_units: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            units_per_second: default_units_per_second(),
            burst_units: default_burst_units(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_rounds: default_max_rounds(),
            max_duration_secs: None,
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_refresh_token_path() -> PathBuf {
    PathBuf::from("refresh_token.json")
}

fn default_page_size() -> u32 {
    100
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_units_per_second() -> f64 {
    250.0
}

fn default_burst_units() -> f64 {
    500.0
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_max_rounds() -> u32 {
    100
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetch.page_size == 0 {
            return Err(GmailError::ConfigError(
                "fetch.page_size must be at least 1".to_string(),
            ));
        }
        if self.fetch.page_size > MAX_PAGE_SIZE {
            return Err(GmailError::ConfigError(format!(
                "fetch.page_size cannot exceed {} (Gmail list limit)",
                MAX_PAGE_SIZE
            )));
        }
        if self.fetch.max_results == Some(0) {
            return Err(GmailError::ConfigError(
                "fetch.max_results must be greater than 0 when set".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts > 10 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts cannot exceed 10".to_string(),
            ));
        }
        if self.retry.max_backoff_secs == 0 {
            return Err(GmailError::ConfigError(
                "retry.max_backoff_secs must be greater than 0".to_string(),
            ));
        }

        if self.quota.units_per_second <= 0.0 {
            return Err(GmailError::ConfigError(
                "quota.units_per_second must be greater than 0".to_string(),
            ));
        }
        if self.quota.burst_units <= 0.0 {
            return Err(GmailError::ConfigError(
                "quota.burst_units must be greater than 0".to_string(),
            ));
        }

        if self.mutation.batch_size == 0 {
            return Err(GmailError::ConfigError(
                "mutation.batch_size must be at least 1".to_string(),
            ));
        }
        if self.mutation.batch_size > MAX_BATCH_SIZE {
            return Err(GmailError::ConfigError(format!(
                "mutation.batch_size cannot exceed {} (Gmail batch limit)",
                MAX_BATCH_SIZE
            )));
        }
        if self.mutation.max_rounds == 0 {
            return Err(GmailError::ConfigError(
                "mutation.max_rounds must be greater than 0".to_string(),
            ));
        }
        if self.mutation.max_duration_secs == Some(0) {
            return Err(GmailError::ConfigError(
                "mutation.max_duration_secs must be greater than 0 when set".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
