//! Required-channel membership checks

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use super::error::platform_call;
use super::{ChannelId, ChatPlatform, UserId};
use crate::MODERATION_TARGET;

/// Result of checking a user against every required channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCheck {
    pub all_satisfied: bool,
    /// In the order the channels were configured
    pub missing: Vec<ChannelId>,
}

#[derive(Clone)]
pub struct ChannelGate {
    platform: Arc<dyn ChatPlatform>,
    call_timeout: Duration,
}

impl ChannelGate {
    #[must_use]
    pub fn new(platform: Arc<dyn ChatPlatform>, call_timeout: Duration) -> Self {
        Self {
            platform,
            call_timeout,
        }
    }

    /// A failed lookup counts as not a member
    pub async fn is_member(&self, channel: ChannelId, user: UserId) -> bool {
        match platform_call(
            self.call_timeout,
            self.platform.channel_membership(channel, user),
        )
        .await
        {
            Ok(status) => status.is_member(),
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    channel_id = %channel,
                    user_id = %user,
                    error = %error,
                    "Membership lookup failed, treating as missing"
                );
                false
            }
        }
    }

    /// Check all `channels` concurrently
    pub async fn check_all(&self, user: UserId, channels: &[ChannelId]) -> ChannelCheck {
        let lookups = channels
            .iter()
            .map(|&channel| async move { (channel, self.is_member(channel, user).await) });
        let missing: Vec<ChannelId> = join_all(lookups)
            .await
            .into_iter()
            .filter(|(_, member)| !member)
            .map(|(channel, _)| channel)
            .collect();
        ChannelCheck {
            all_satisfied: missing.is_empty(),
            missing,
        }
    }
}
