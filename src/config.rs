use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CleanerError, Result};
use crate::retry::RetryPolicy;

/// Gmail's batchModify accepts at most 1000 ids per call
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanerConfig {
    /// Label promotional messages are moved under
    #[serde(default = "default_target_folder")]
    pub target_folder: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Optional cap on how many unread ids a single run lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            target_folder: default_target_folder(),
            batch_size: default_batch_size(),
            max_messages: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Sleeps inserted between batches to stay under sustained rate limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    #[serde(default = "default_fetch_base_ms")]
    pub fetch_base_ms: u64,
    #[serde(default = "default_fetch_ramp_ms")]
    pub fetch_ramp_ms: u64,
    #[serde(default = "default_fetch_cap_ms")]
    pub fetch_cap_ms: u64,
    #[serde(default = "default_apply_min_ms")]
    pub apply_min_ms: u64,
    #[serde(default = "default_apply_max_ms")]
    pub apply_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            fetch_base_ms: default_fetch_base_ms(),
            fetch_ramp_ms: default_fetch_ramp_ms(),
            fetch_cap_ms: default_fetch_cap_ms(),
            apply_min_ms: default_apply_min_ms(),
            apply_max_ms: default_apply_max_ms(),
        }
    }
}

impl PacingConfig {
    /// No sleeping at all, for tests and local mocks
    pub fn disabled() -> Self {
        Self {
            fetch_base_ms: 0,
            fetch_ramp_ms: 0,
            fetch_cap_ms: 0,
            apply_min_ms: 0,
            apply_max_ms: 0,
        }
    }

    /// Delay after a metadata batch that started at `offset` of `total` ids.
    ///
    /// Grows linearly from `fetch_base_ms` toward `fetch_base_ms + fetch_ramp_ms`
    /// over the run and never exceeds `fetch_cap_ms`.
    pub fn fetch_delay(&self, offset: usize, total: usize) -> Duration {
        if total == 0 {
            return Duration::ZERO;
        }
        let progress = offset as f64 / total as f64;
        let ms = self.fetch_base_ms as f64 + progress * self.fetch_ramp_ms as f64;
        Duration::from_millis((ms.round() as u64).min(self.fetch_cap_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesConfig {
    #[serde(default = "default_senders_file")]
    pub senders_file: PathBuf,
    #[serde(default = "default_subjects_file")]
    pub subjects_file: PathBuf,
    #[serde(default = "default_domains_file")]
    pub domains_file: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            senders_file: default_senders_file(),
            subjects_file: default_subjects_file(),
            domains_file: default_domains_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationConfig {
    /// Label id Gmail assigns to mail it files under the Promotions tab
    #[serde(default = "default_category_marker")]
    pub category_marker: String,
    /// Subject keywords checked after every rule list has missed
    #[serde(default = "default_fallback_keywords")]
    pub fallback_keywords: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            category_marker: default_category_marker(),
            fallback_keywords: default_fallback_keywords(),
        }
    }
}

fn default_target_folder() -> String {
    "GmailCleaner".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_jitter_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fetch_base_ms() -> u64 {
    1000
}

fn default_fetch_ramp_ms() -> u64 {
    2000
}

fn default_fetch_cap_ms() -> u64 {
    5000
}

fn default_apply_min_ms() -> u64 {
    1000
}

fn default_apply_max_ms() -> u64 {
    2500
}

fn default_senders_file() -> PathBuf {
    PathBuf::from("logs/promotional_senders.txt")
}

fn default_subjects_file() -> PathBuf {
    PathBuf::from("logs/promotional_subjects.txt")
}

fn default_domains_file() -> PathBuf {
    PathBuf::from("logs/promotional_domains.txt")
}

fn default_category_marker() -> String {
    "CATEGORY_PROMOTIONS".to_string()
}

fn default_fallback_keywords() -> Vec<String> {
    [
        "promo",
        "sale",
        "discount",
        "newsletter",
        "coupon",
        "free",
        "deal",
        "offre",
        "gratuit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                CleanerError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                CleanerError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CleanerError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            CleanerError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            CleanerError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Apply `TARGET_FOLDER`, `BATCH_SIZE`, `MAX_RETRIES` and `BASE_DELAY_MS`
    /// on top of the file values
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(folder) = lookup("TARGET_FOLDER") {
            let folder = folder.trim();
            if !folder.is_empty() {
                self.cleaner.target_folder = folder.to_string();
            }
        }
        if let Some(value) = lookup("BATCH_SIZE") {
            self.cleaner.batch_size = parse_env("BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("MAX_RETRIES") {
            self.retry.max_attempts = parse_env("MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("BASE_DELAY_MS", &value)?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cleaner.target_folder.trim().is_empty() {
            return Err(CleanerError::ConfigError(
                "cleaner.target_folder cannot be empty".to_string(),
            ));
        }

        if self.cleaner.batch_size == 0 {
            return Err(CleanerError::ConfigError(
                "cleaner.batch_size must be at least 1".to_string(),
            ));
        }
        if self.cleaner.batch_size > MAX_BATCH_SIZE {
            return Err(CleanerError::ConfigError(format!(
                "cleaner.batch_size cannot exceed {} (Gmail batchModify limit)",
                MAX_BATCH_SIZE
            )));
        }
        if self.cleaner.max_messages == Some(0) {
            return Err(CleanerError::ConfigError(
                "cleaner.max_messages must be at least 1 when set".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(CleanerError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.request_timeout_secs == 0 {
            return Err(CleanerError::ConfigError(
                "retry.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.pacing.apply_min_ms > self.pacing.apply_max_ms {
            return Err(CleanerError::ConfigError(
                "pacing.apply_min_ms cannot exceed pacing.apply_max_ms".to_string(),
            ));
        }

        if self.classification.category_marker.is_empty() {
            return Err(CleanerError::ConfigError(
                "classification.category_marker cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CleanerError::ConfigError(format!("{} has an invalid value: '{}'", key, value))
    })
}
