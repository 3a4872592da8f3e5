//! Prompt buttons that let a restricted user, or an admin, lift a restriction

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::platform_call;
use super::prompts::{
    self, ADMINS_ONLY, CHANNELS_OFF, CHANNELS_SUCCESS, CHECK_ADDED_SUCCESS, NOT_YOUR_BUTTON,
    PromptAction,
};
use super::{
    ChannelGate, ChannelId, ChatPlatform, ContributionLedger, GroupId, MessageId, PolicyStore,
    PrivilegeRegistry, PromptKind, ReleaseReason, RestrictionMachine, UserId,
};
use crate::MODERATION_TARGET;

/// A press on a prompt button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPress {
    pub group: GroupId,
    pub channel: ChannelId,
    pub message: MessageId,
    pub presser: UserId,
    pub action: PromptAction,
}

/// What the presser sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonOutcome {
    /// Shown only to the presser; the prompt stays
    Alert(String),
    /// The prompt was replaced with this text
    Edited(String),
    Ack,
}

pub struct ReliefFlow {
    platform: Arc<dyn ChatPlatform>,
    policies: Arc<PolicyStore>,
    ledger: Arc<ContributionLedger>,
    privileges: Arc<PrivilegeRegistry>,
    restrictions: Arc<RestrictionMachine>,
    gate: ChannelGate,
    call_timeout: Duration,
}

impl ReliefFlow {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        policies: Arc<PolicyStore>,
        ledger: Arc<ContributionLedger>,
        privileges: Arc<PrivilegeRegistry>,
        restrictions: Arc<RestrictionMachine>,
        gate: ChannelGate,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            policies,
            ledger,
            privileges,
            restrictions,
            gate,
            call_timeout,
        }
    }

    pub async fn handle(&self, press: ButtonPress) -> ButtonOutcome {
        match press.action {
            PromptAction::Noop => ButtonOutcome::Ack,
            PromptAction::CheckAdded(owner) => self.check_added(press, owner).await,
            PromptAction::Grant(target) => self.grant_button(press, target).await,
            PromptAction::Joined(owner) => self.joined(press, owner).await,
        }
    }

    /// Grant `user` privilege in `group` and lift a restriction in force
    pub async fn grant(&self, group: GroupId, user: UserId) {
        let _guard = self.restrictions.lock(group, user).await;
        self.privileges.grant(group, user).await;
        self.restrictions
            .release_if_restricted(group, user, ReleaseReason::Privileged, Utc::now())
            .await;
    }

    async fn check_added(&self, press: ButtonPress, owner: UserId) -> ButtonOutcome {
        if press.presser != owner {
            return ButtonOutcome::Alert(NOT_YOUR_BUTTON.to_string());
        }
        let group = press.group;
        let policy = self.policies.get(group).await;

        let _guard = self.restrictions.lock(group, owner).await;
        if self.privileges.has(group, owner).await {
            self.restrictions
                .release_if_restricted(group, owner, ReleaseReason::Privileged, Utc::now())
                .await;
            return self
                .settle(press, owner, PromptKind::Referral, CHECK_ADDED_SUCCESS.to_string())
                .await;
        }

        let count = self.ledger.get(group, owner).await;
        let threshold = policy.referral_threshold;
        if !policy.referral_gating_enabled() || count >= u64::from(threshold) {
            self.restrictions
                .release_if_restricted(group, owner, ReleaseReason::ThresholdReached, Utc::now())
                .await;
            return self
                .settle(press, owner, PromptKind::Referral, CHECK_ADDED_SUCCESS.to_string())
                .await;
        }
        ButtonOutcome::Alert(prompts::referral_progress(count, threshold))
    }

    async fn grant_button(&self, press: ButtonPress, target: UserId) -> ButtonOutcome {
        match platform_call(
            self.call_timeout,
            self.platform.member_status(press.group, press.presser),
        )
        .await
        {
            Ok(status) if status.is_admin() => {}
            Ok(_) => return ButtonOutcome::Alert(ADMINS_ONLY.to_string()),
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %press.group,
                    user_id = %press.presser,
                    error = %error,
                    "Admin lookup failed for grant button"
                );
                return ButtonOutcome::Alert(ADMINS_ONLY.to_string());
            }
        }

        self.grant(press.group, target).await;
        self.settle(press, target, PromptKind::Referral, prompts::grant_success(target))
            .await
    }

    async fn joined(&self, press: ButtonPress, owner: UserId) -> ButtonOutcome {
        if press.presser != owner {
            return ButtonOutcome::Alert(NOT_YOUR_BUTTON.to_string());
        }
        let group = press.group;
        let policy = self.policies.get(group).await;

        let _guard = self.restrictions.lock(group, owner).await;
        if !policy.channel_gating_enabled() {
            self.restrictions
                .release_if_restricted(group, owner, ReleaseReason::ChannelsSatisfied, Utc::now())
                .await;
            return self
                .settle(press, owner, PromptKind::Channels, CHANNELS_OFF.to_string())
                .await;
        }

        let check = self.gate.check_all(owner, &policy.required_channels).await;
        if !check.all_satisfied {
            return ButtonOutcome::Alert(prompts::channels_still_missing(&check.missing));
        }
        self.restrictions
            .release_if_restricted(group, owner, ReleaseReason::ChannelsSatisfied, Utc::now())
            .await;
        self.settle(press, owner, PromptKind::Channels, CHANNELS_SUCCESS.to_string())
            .await
    }

    /// Replace the prompt text and stop tracking it
    async fn settle(
        &self,
        press: ButtonPress,
        user: UserId,
        kind: PromptKind,
        text: String,
    ) -> ButtonOutcome {
        self.restrictions.forget_prompt(press.group, user, kind);
        if let Err(error) = platform_call(
            self.call_timeout,
            self.platform
                .edit_prompt(press.channel, press.message, text.clone()),
        )
        .await
        {
            debug!(
                target: MODERATION_TARGET,
                group_id = %press.group,
                error = %error,
                "Failed to edit prompt"
            );
        }
        ButtonOutcome::Edited(text)
    }
}
