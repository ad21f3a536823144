use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::WritePolicy;

/// Public JSON blob that holds the shared review document
pub const DEFAULT_STORE_URL: &str = "https://jsonblob.com/api/jsonBlob/1276205847623958528";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub notifications: NotificationsConfig,
}

/// Remote document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub write_policy: WritePolicyKind,
    /// Fetch/append/write rounds before giving up, optimistic policy only
    pub max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STORE_URL.to_string(),
            write_policy: WritePolicyKind::LastWriterWins,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicyKind {
    LastWriterWins,
    Optimistic,
}

impl StoreConfig {
    pub fn write_policy(&self) -> WritePolicy {
        match self.write_policy {
            WritePolicyKind::LastWriterWins => WritePolicy::LastWriterWins,
            WritePolicyKind::Optimistic => WritePolicy::Optimistic {
                max_attempts: self.max_attempts,
            },
        }
    }
}

/// Notifications configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    pub slack: SlackConfig,
}

/// Slack notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
    pub on_new_review: bool,
    pub on_failure: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            channel: None,
            on_new_review: true,
            on_failure: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        info!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Load configuration from the default location (.review-board/config.yml)
    pub fn load_default() -> Result<Self> {
        Self::load(".review-board/config.yml")
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.store.url)
            .with_context(|| format!("Invalid store url: {}", self.store.url))?;

        if self.store.max_attempts == 0 {
            anyhow::bail!("store.max_attempts must be at least 1");
        }

        let slack = &self.notifications.slack;
        if slack.enabled && slack.webhook_url.is_none() {
            anyhow::bail!("notifications.slack.enabled requires webhook_url");
        }

        Ok(())
    }
}
