use std::{ops::Deref, sync::Arc, time::Instant};

use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use tracing::info;

use crate::config::BotConfig;
use crate::discord::{InviteTracker, SerenityPlatform, invite_url};
use crate::moderation::{ModerationEngine, ProfanityList, UserId, YamlStore};
use crate::{CONSOLE_TARGET, Error};

/// Data shared by commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("commands_in_flight", &self.command_starts.len())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DataInner {
    pub config: BotConfig,
    pub engine: ModerationEngine,
    pub invites: InviteTracker,
    /// Start time of each running command, keyed by invocation id
    pub command_starts: DashMap<u64, Instant>,
}

impl Data {
    #[must_use]
    pub fn new(config: BotConfig, engine: ModerationEngine) -> Self {
        Self(Arc::new(DataInner {
            config,
            engine,
            invites: InviteTracker::new(),
            command_starts: DashMap::new(),
        }))
    }

    /// Open the store, load the word list and wire the engine to Discord
    pub async fn load(
        config: BotConfig,
        http: Arc<serenity::Http>,
        cache: Arc<serenity::Cache>,
        application: serenity::ApplicationId,
    ) -> Result<Self, Error> {
        let store = YamlStore::load(config.data_dir.clone()).await?;
        let profanity = ProfanityList::load(&config.profanity_file).await?;
        info!(
            target: CONSOLE_TARGET,
            data_dir = %config.data_dir.display(),
            profanity_words = profanity.len(),
            "Moderation data loaded"
        );

        let invite = config
            .invite_url
            .clone()
            .unwrap_or_else(|| invite_url(application));
        let platform = SerenityPlatform::new(http, cache, Some(invite));
        let engine = ModerationEngine::new(
            Arc::new(platform),
            Arc::new(store),
            config.moderation_settings(),
            profanity,
        );
        Ok(Self::new(config, engine))
    }

    #[must_use]
    pub fn is_owner(&self, user: serenity::UserId) -> bool {
        self.config.is_owner(UserId(user.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationSettings;
    use crate::moderation::testing::FakePlatform;

    fn data(owners: Vec<u64>) -> Data {
        let config = BotConfig {
            owner_ids: owners,
            ..BotConfig::default()
        };
        let engine = ModerationEngine::new(
            Arc::new(FakePlatform::default()),
            Arc::new(YamlStore::in_memory()),
            ModerationSettings::default(),
            ProfanityList::builtin(),
        );
        Data::new(config, engine)
    }

    #[test]
    fn test_owner_check() {
        let data = data(vec![5]);
        assert!(data.is_owner(serenity::UserId::new(5)));
        assert!(!data.is_owner(serenity::UserId::new(6)));
    }

    #[test]
    fn test_data_debug_impl() {
        let data = data(Vec::new());
        let debug = format!("{data:?}");
        assert!(debug.contains("Data"));
        assert!(debug.contains("commands_in_flight"));
    }
}
