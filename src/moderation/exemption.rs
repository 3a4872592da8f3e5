//! Messages that bypass every gate and content check

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::error::platform_call;
use super::{ChatPlatform, InboundMessage, LinkedChannelCache, PostedAs, UserId};
use crate::MODERATION_TARGET;

/// Why a message was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exemption {
    /// Copied in from the group's linked broadcast channel
    LinkedChannelForward,
    /// Posted on behalf of the group itself
    PostedAsGroup,
    /// Posted on behalf of the group's linked channel
    LinkedChannelPost,
    Administrator,
    AllowListed,
}

impl std::fmt::Display for Exemption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkedChannelForward => write!(f, "linked_channel_forward"),
            Self::PostedAsGroup => write!(f, "posted_as_group"),
            Self::LinkedChannelPost => write!(f, "linked_channel_post"),
            Self::Administrator => write!(f, "administrator"),
            Self::AllowListed => write!(f, "allow_listed"),
        }
    }
}

/// Static allow-list from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    user_ids: HashSet<UserId>,
    usernames: HashSet<String>,
}

impl AllowList {
    #[must_use]
    pub fn new(
        user_ids: impl IntoIterator<Item = UserId>,
        usernames: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            user_ids: user_ids.into_iter().collect(),
            usernames: usernames
                .into_iter()
                .map(|name| name.trim_start_matches('@').to_lowercase())
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, user: UserId, username: Option<&str>) -> bool {
        self.user_ids.contains(&user)
            || username.is_some_and(|name| self.usernames.contains(&name.to_lowercase()))
    }
}

pub struct ExemptionCheck {
    platform: Arc<dyn ChatPlatform>,
    linked: LinkedChannelCache,
    allow: AllowList,
    call_timeout: Duration,
}

impl ExemptionCheck {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        linked: LinkedChannelCache,
        allow: AllowList,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            linked,
            allow,
            call_timeout,
        }
    }

    /// The first exemption that applies to `message`, checked in order
    pub async fn check(&self, message: &InboundMessage) -> Option<Exemption> {
        let group = message.group;

        if message.automatic_forward {
            // With a linked channel, any automatic forward counts as coming from it,
            // including ones whose origin is hidden.
            if self.linked_channel(message).await.is_some() {
                return Some(Exemption::LinkedChannelForward);
            }
        }

        match message.posted_as {
            Some(PostedAs::Group) => return Some(Exemption::PostedAsGroup),
            Some(PostedAs::Channel(channel)) => {
                if self.linked_channel(message).await == Some(channel) {
                    return Some(Exemption::LinkedChannelPost);
                }
            }
            None => {}
        }

        match platform_call(
            self.call_timeout,
            self.platform.member_status(group, message.sender.id),
        )
        .await
        {
            Ok(status) if status.is_admin() => return Some(Exemption::Administrator),
            Ok(_) => {}
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %message.sender.id,
                    error = %error,
                    "Admin lookup failed, treating as regular member"
                );
            }
        }

        if self
            .allow
            .contains(message.sender.id, message.sender.username.as_deref())
        {
            return Some(Exemption::AllowListed);
        }
        None
    }

    async fn linked_channel(&self, message: &InboundMessage) -> Option<super::ChannelId> {
        self.linked
            .resolve(message.group, self.platform.as_ref(), self.call_timeout)
            .await
    }
}
