//! Referral gate: members must bring new members before they may write

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::prompts::referral_prompt;
use super::{
    ChatPlatform, ContributionLedger, GroupId, GroupPolicy, InboundMessage, ModerationPipeline,
    PrivilegeRegistry, PromptKind, ReleaseReason, RestrictionMachine, UserId,
    Verdict, Violation,
};
use crate::MODERATION_TARGET;

pub struct ReferralGate {
    platform: Arc<dyn ChatPlatform>,
    ledger: Arc<ContributionLedger>,
    privileges: Arc<PrivilegeRegistry>,
    restrictions: Arc<RestrictionMachine>,
}

impl ReferralGate {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        ledger: Arc<ContributionLedger>,
        privileges: Arc<PrivilegeRegistry>,
        restrictions: Arc<RestrictionMachine>,
    ) -> Self {
        Self {
            platform,
            ledger,
            privileges,
            restrictions,
        }
    }

    /// `None` lets the message continue to the content pipeline
    ///
    /// The caller holds the sender's transition lock. `pipeline` performs the delete.
    pub async fn evaluate(
        &self,
        message: &InboundMessage,
        policy: &GroupPolicy,
        pipeline: &ModerationPipeline,
        now: DateTime<Utc>,
    ) -> Option<Verdict> {
        if !policy.referral_gating_enabled() {
            return None;
        }
        let group = message.group;
        let user = message.sender.id;

        if self.restrictions.observe(group, user, now).await.is_restricted() {
            return Some(pipeline.remove(message, Violation::Restricted).await);
        }
        if self.privileges.has(group, user).await {
            return None;
        }

        let threshold = policy.referral_threshold;
        let count = self.ledger.get(group, user).await;
        if count >= u64::from(threshold) {
            return None;
        }

        let verdict = pipeline
            .remove(
                message,
                Violation::ReferralShortfall {
                    required: threshold,
                    current: count,
                },
            )
            .await;
        self.restrictions.restrict(group, user, now).await;
        let prompt = referral_prompt(
            &message.sender,
            threshold,
            count,
            self.platform.invite_link().as_deref(),
        );
        self.restrictions
            .replace_prompt(group, user, PromptKind::Referral, message.channel, prompt)
            .await;
        Some(verdict)
    }

    /// Credit `adder` once for every member other than themselves
    ///
    /// When the credit brings a restricted adder to the threshold, the
    /// restriction is released. Returns the adder's new count.
    pub async fn credit_joins(
        &self,
        group: GroupId,
        adder: UserId,
        members: &[UserId],
        policy: &GroupPolicy,
        now: DateTime<Utc>,
    ) -> u64 {
        let credited = members.iter().filter(|member| **member != adder).count();
        if credited == 0 {
            return self.ledger.get(group, adder).await;
        }

        let count = self
            .ledger
            .increment(group, adder, u64::try_from(credited).unwrap_or(u64::MAX))
            .await;
        info!(
            target: MODERATION_TARGET,
            group_id = %group,
            user_id = %adder,
            credited,
            count,
            event = "credited",
            "Members credited"
        );

        if policy.referral_gating_enabled() && count >= u64::from(policy.referral_threshold) {
            let _guard = self.restrictions.lock(group, adder).await;
            self.restrictions
                .release_if_restricted(group, adder, ReleaseReason::ThresholdReached, now)
                .await;
        }
        count
    }
}
