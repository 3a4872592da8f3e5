//! Composition root of the moderation core

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::content::ProfanityList;
use super::store::ContributionRow;
use super::{
    AllowList, BroadcastPayload, BroadcastReport, ButtonOutcome, ButtonPress, ChannelGate,
    ChatPlatform, ContributionLedger, ExemptionCheck, GroupId, GroupPolicy, InboundMessage,
    LinkedChannelCache, MessageKind, ModerationPipeline, PersistentStore, PolicyStore,
    PolicyUpdate, PrivilegeRegistry, ReferralGate, ReliefFlow, RestrictionMachine,
    SubscriberDirectory, UserId, Verdict, Violation,
};
use crate::MODERATION_TARGET;

/// Tunables of the moderation core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationSettings {
    pub policy_cache_ttl: Duration,
    pub restriction_duration: Duration,
    /// Deadline for every store and platform call
    pub call_timeout: Duration,
    pub broadcast_delay: Duration,
    pub linked_cache_ttl: Duration,
    pub linked_cache_capacity: usize,
    pub top_limit: usize,
    pub allow_list: AllowList,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            policy_cache_ttl: Duration::from_secs(20),
            restriction_duration: Duration::from_secs(60),
            call_timeout: Duration::from_secs(5),
            broadcast_delay: Duration::from_millis(50),
            linked_cache_ttl: Duration::from_secs(300),
            linked_cache_capacity: 1024,
            top_limit: 100,
            allow_list: AllowList::default(),
        }
    }
}

pub struct ModerationEngine {
    pub policies: Arc<PolicyStore>,
    pub ledger: Arc<ContributionLedger>,
    pub privileges: Arc<PrivilegeRegistry>,
    pub restrictions: Arc<RestrictionMachine>,
    pub subscribers: SubscriberDirectory,
    exemptions: ExemptionCheck,
    referral: ReferralGate,
    pipeline: ModerationPipeline,
    relief: ReliefFlow,
    settings: ModerationSettings,
}

impl std::fmt::Debug for ModerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModerationEngine {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn PersistentStore>,
        settings: ModerationSettings,
        profanity: ProfanityList,
    ) -> Self {
        let timeout = settings.call_timeout;
        let policies = Arc::new(PolicyStore::new(
            store.clone(),
            settings.policy_cache_ttl,
            timeout,
        ));
        let ledger = Arc::new(ContributionLedger::new(store.clone(), timeout));
        let privileges = Arc::new(PrivilegeRegistry::new(store.clone(), timeout));
        let restrictions = Arc::new(RestrictionMachine::new(
            store.clone(),
            platform.clone(),
            settings.restriction_duration,
            timeout,
        ));
        let gate = ChannelGate::new(platform.clone(), timeout);

        Self {
            exemptions: ExemptionCheck::new(
                platform.clone(),
                LinkedChannelCache::new(settings.linked_cache_ttl, settings.linked_cache_capacity),
                settings.allow_list.clone(),
                timeout,
            ),
            referral: ReferralGate::new(
                platform.clone(),
                ledger.clone(),
                privileges.clone(),
                restrictions.clone(),
            ),
            pipeline: ModerationPipeline::new(
                platform.clone(),
                privileges.clone(),
                restrictions.clone(),
                gate.clone(),
                profanity,
                timeout,
            ),
            relief: ReliefFlow::new(
                platform.clone(),
                policies.clone(),
                ledger.clone(),
                privileges.clone(),
                restrictions.clone(),
                gate,
                timeout,
            ),
            subscribers: SubscriberDirectory::new(
                store,
                platform,
                settings.broadcast_delay,
                timeout,
            ),
            policies,
            ledger,
            privileges,
            restrictions,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ModerationSettings {
        &self.settings
    }

    /// Moderate one group message
    pub async fn handle_message(&self, message: &InboundMessage) -> Verdict {
        if message.kind != MessageKind::Regular {
            return self.pipeline.remove(message, Violation::ServiceNotice).await;
        }
        if let Some(exemption) = self.exemptions.check(message).await {
            debug!(
                target: MODERATION_TARGET,
                group_id = %message.group,
                user_id = %message.sender.id,
                exemption = %exemption,
                "Message exempt"
            );
            return Verdict::Exempt(exemption);
        }

        let group = message.group;
        let policy = self.policies.get(group).await;
        let _guard = self.restrictions.lock(group, message.sender.id).await;
        let now = Utc::now();

        if let Some(verdict) = self
            .referral
            .evaluate(message, &policy, &self.pipeline, now)
            .await
        {
            return verdict;
        }
        self.pipeline.evaluate(message, &policy, now).await
    }

    /// `adder` brought `members` into `group`; returns the adder's new count
    pub async fn on_members_joined(&self, group: GroupId, adder: UserId, members: &[UserId]) -> u64 {
        let policy = self.policies.get(group).await;
        self.referral
            .credit_joins(group, adder, members, &policy, Utc::now())
            .await
    }

    pub async fn on_button(&self, press: ButtonPress) -> ButtonOutcome {
        self.relief.handle(press).await
    }

    pub async fn update_policy(&self, group: GroupId, update: PolicyUpdate) -> GroupPolicy {
        self.policies.set(group, update).await
    }

    pub async fn grant_privilege(&self, group: GroupId, user: UserId) {
        self.relief.grant(group, user).await;
    }

    /// Clear every count and privilege grant in `group`
    pub async fn reset_group(&self, group: GroupId) {
        self.ledger.clear_group(group).await;
        self.privileges.revoke_all(group).await;
    }

    pub async fn leaderboard(&self, group: GroupId) -> Vec<ContributionRow> {
        self.ledger.top(group, self.settings.top_limit).await
    }

    pub async fn broadcast(&self, payload: BroadcastPayload) -> BroadcastReport {
        self.subscribers.broadcast(payload).await
    }
}
