//! Bot configuration loaded from YAML

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::moderation::{AllowList, ModerationSettings, UserId};

pub const DEFAULT_CONFIG_FILE: &str = "config/bot.yaml";
/// Overrides [`DEFAULT_CONFIG_FILE`]
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub data_dir: PathBuf,
    pub policy_cache_ttl_secs: u64,
    pub restriction_secs: u64,
    pub call_timeout_ms: u64,
    pub broadcast_delay_ms: u64,
    pub linked_cache_ttl_secs: u64,
    pub linked_cache_capacity: usize,
    pub top_limit: usize,
    pub allow_user_ids: Vec<u64>,
    pub allow_usernames: Vec<String>,
    /// Users allowed to broadcast
    pub owner_ids: Vec<u64>,
    pub profanity_file: PathBuf,
    /// Overrides the link built from the application id
    pub invite_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        let settings = ModerationSettings::default();
        Self {
            data_dir: PathBuf::from("data"),
            policy_cache_ttl_secs: settings.policy_cache_ttl.as_secs(),
            restriction_secs: settings.restriction_duration.as_secs(),
            call_timeout_ms: duration_ms(settings.call_timeout),
            broadcast_delay_ms: duration_ms(settings.broadcast_delay),
            linked_cache_ttl_secs: settings.linked_cache_ttl.as_secs(),
            linked_cache_capacity: settings.linked_cache_capacity,
            top_limit: settings.top_limit,
            allow_user_ids: Vec::new(),
            allow_usernames: Vec::new(),
            owner_ids: Vec::new(),
            profanity_file: PathBuf::from("config/profanity.txt"),
            invite_url: None,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl BotConfig {
    /// Load from `$WARDEN_CONFIG` or [`DEFAULT_CONFIG_FILE`]
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::load_from(&path).await
    }

    /// A missing file yields the defaults
    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    #[must_use]
    pub fn moderation_settings(&self) -> ModerationSettings {
        ModerationSettings {
            policy_cache_ttl: Duration::from_secs(self.policy_cache_ttl_secs),
            restriction_duration: Duration::from_secs(self.restriction_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            broadcast_delay: Duration::from_millis(self.broadcast_delay_ms),
            linked_cache_ttl: Duration::from_secs(self.linked_cache_ttl_secs),
            linked_cache_capacity: self.linked_cache_capacity,
            top_limit: self.top_limit,
            allow_list: AllowList::new(
                self.allow_user_ids.iter().copied().map(UserId),
                self.allow_usernames.iter().cloned(),
            ),
        }
    }

    #[must_use]
    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner_ids.contains(&user.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_moderation_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.moderation_settings(), ModerationSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = BotConfig::parse(
            "restriction_secs: 120\nowner_ids: [7]\nallow_usernames: ['@Helper']\n",
        )
        .expect("valid yaml");
        assert_eq!(config.restriction_secs, 120);
        assert_eq!(config.top_limit, 100);
        assert!(config.is_owner(UserId(7)));
        assert!(!config.is_owner(UserId(8)));

        let settings = config.moderation_settings();
        assert_eq!(settings.restriction_duration, Duration::from_secs(120));
        assert!(settings.allow_list.contains(UserId(1), Some("helper")));
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(BotConfig::parse("  \n").ok(), Some(BotConfig::default()));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(BotConfig::parse("restriction_secs: [not a number").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!("warden-{}.yaml", uuid::Uuid::new_v4()));
        let config = BotConfig::load_from(&path).await.expect("defaults");
        assert_eq!(config, BotConfig::default());
    }
}
