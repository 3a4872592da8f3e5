//! Attribute member joins to the invite that was used
//!
//! Discord does not say who brought a new member in. The tracker keeps the use
//! count of every invite per server; after a join, the invite whose count went
//! up names the inviter.

use std::collections::HashMap;

use dashmap::DashMap;
use poise::serenity_prelude::{self as serenity, Http, RichInvite};
use tracing::debug;

use super::platform::classify;
use crate::EVENT_TARGET;
use crate::moderation::{GroupId, PlatformResult, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteUse {
    pub uses: u64,
    pub max_uses: u64,
    pub inviter: Option<UserId>,
}

pub type InviteSnapshot = HashMap<String, InviteUse>;

/// The inviter behind the one join between `before` and `after`
///
/// An invite that vanished counts when it was one use short of its limit.
#[must_use]
pub fn attribute_join(before: &InviteSnapshot, after: &InviteSnapshot) -> Option<UserId> {
    let mut used = after.iter().filter(|(code, now)| {
        before
            .get(*code)
            .is_some_and(|then| now.uses > then.uses)
    });
    if let Some((_, invite)) = used.next() {
        return if used.next().is_none() {
            invite.inviter
        } else {
            None
        };
    }

    let mut exhausted = before.iter().filter(|(code, then)| {
        !after.contains_key(*code) && then.max_uses != 0 && then.uses + 1 == then.max_uses
    });
    match (exhausted.next(), exhausted.next()) {
        (Some((_, invite)), None) => invite.inviter,
        _ => None,
    }
}

fn snapshot(invites: &[RichInvite]) -> InviteSnapshot {
    invites
        .iter()
        .map(|invite| {
            (
                invite.code.clone(),
                InviteUse {
                    uses: u64::from(invite.uses),
                    max_uses: u64::from(invite.max_uses),
                    inviter: invite.inviter.as_ref().map(|user| UserId(user.id.get())),
                },
            )
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct InviteTracker {
    snapshots: DashMap<GroupId, InviteSnapshot>,
}

impl InviteTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch(http: &Http, guild: serenity::GuildId) -> PlatformResult<InviteSnapshot> {
        let invites = guild.invites(http).await.map_err(classify)?;
        Ok(snapshot(&invites))
    }

    /// Take a fresh snapshot of `guild`'s invites
    pub async fn refresh(&self, http: &Http, guild: serenity::GuildId) -> PlatformResult<()> {
        let current = Self::fetch(http, guild).await?;
        debug!(
            target: EVENT_TARGET,
            group_id = %guild,
            invites = current.len(),
            "Invite snapshot refreshed"
        );
        self.snapshots.insert(GroupId(guild.get()), current);
        Ok(())
    }

    /// Compare against the last snapshot after a member joined `guild`
    pub async fn inviter_of_join(
        &self,
        http: &Http,
        guild: serenity::GuildId,
    ) -> PlatformResult<Option<UserId>> {
        let current = Self::fetch(http, guild).await?;
        let group = GroupId(guild.get());
        let inviter = self
            .snapshots
            .get(&group)
            .and_then(|before| attribute_join(&before, &current));
        self.snapshots.insert(group, current);
        Ok(inviter)
    }

    pub fn forget(&self, guild: serenity::GuildId) {
        self.snapshots.remove(&GroupId(guild.get()));
    }
}
