//! The per-message moderation pipeline
//!
//! Runs on messages that passed the exemption check and the referral gate.
//! Checks run in a fixed order and the first one that matches decides the
//! message: it is deleted, and most violations post a warning.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::content::{self, ProfanityList};
use super::error::platform_call;
use super::prompts::{channel_prompt, violation_warning};
use super::{
    ChannelGate, ChannelId, ChatPlatform, Exemption, GroupPolicy, InboundMessage,
    PrivilegeRegistry, PromptKind, RestrictionMachine,
};
use crate::MODERATION_TARGET;

/// Why a message was removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Join and leave notices
    ServiceNotice,
    NightMode,
    /// The sender is serving a restriction
    Restricted,
    ReferralShortfall { required: u32, current: u64 },
    MissingChannels(Vec<ChannelId>),
    ViaBot,
    SuspiciousButtons,
    GameKeywords,
    /// A bot account posted a game or a link
    BotLink,
    HiddenLink,
    LinkText,
    Profanity,
}

impl Violation {
    /// Stable name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ServiceNotice => "service_notice",
            Self::NightMode => "night_mode",
            Self::Restricted => "restricted",
            Self::ReferralShortfall { .. } => "referral_shortfall",
            Self::MissingChannels(_) => "missing_channels",
            Self::ViaBot => "via_bot",
            Self::SuspiciousButtons => "suspicious_buttons",
            Self::GameKeywords => "game_keywords",
            Self::BotLink => "bot_link",
            Self::HiddenLink => "hidden_link",
            Self::LinkText => "link_text",
            Self::Profanity => "profanity",
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of moderating one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Exempt(Exemption),
    Allowed,
    Deleted(Violation),
}

impl Verdict {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }
}

pub struct ModerationPipeline {
    platform: Arc<dyn ChatPlatform>,
    privileges: Arc<PrivilegeRegistry>,
    restrictions: Arc<RestrictionMachine>,
    gate: ChannelGate,
    profanity: ProfanityList,
    call_timeout: Duration,
}

impl ModerationPipeline {
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        privileges: Arc<PrivilegeRegistry>,
        restrictions: Arc<RestrictionMachine>,
        gate: ChannelGate,
        profanity: ProfanityList,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            privileges,
            restrictions,
            gate,
            profanity,
            call_timeout,
        }
    }

    /// Decide `message` under `policy`
    ///
    /// The caller holds the sender's transition lock.
    pub async fn evaluate(
        &self,
        message: &InboundMessage,
        policy: &GroupPolicy,
        now: DateTime<Utc>,
    ) -> Verdict {
        let group = message.group;
        let user = message.sender.id;

        if policy.night_mode {
            return self.remove(message, Violation::NightMode).await;
        }

        if self.restrictions.observe(group, user, now).await.is_restricted() {
            return self.remove(message, Violation::Restricted).await;
        }

        // Privileged members skip the gate but not an active restriction
        if policy.channel_gating_enabled() && !self.privileges.has(group, user).await {
            let check = self.gate.check_all(user, &policy.required_channels).await;
            if !check.all_satisfied {
                let verdict = self
                    .remove(message, Violation::MissingChannels(check.missing.clone()))
                    .await;
                self.restrictions.restrict(group, user, now).await;
                let prompt = channel_prompt(
                    &message.sender,
                    &check.missing,
                    self.platform.invite_link().as_deref(),
                );
                self.restrictions
                    .replace_prompt(group, user, PromptKind::Channels, message.channel, prompt)
                    .await;
                return verdict;
            }
        }

        match self.content_violation(message) {
            Some(violation) => {
                let verdict = self.remove(message, violation.clone()).await;
                self.warn(message, &violation).await;
                verdict
            }
            None => Verdict::Allowed,
        }
    }

    /// Steps that look only at the message itself
    fn content_violation(&self, message: &InboundMessage) -> Option<Violation> {
        if message.via_bot.is_some() {
            return Some(Violation::ViaBot);
        }
        if content::has_suspicious_buttons(&message.buttons) {
            return Some(Violation::SuspiciousButtons);
        }

        let lower = message.text.to_lowercase();
        if content::has_game_keywords(&lower) {
            return Some(Violation::GameKeywords);
        }
        if message.sender.is_bot
            && (message.has_game
                || content::has_link_entity(&message.entities)
                || content::has_bot_link_text(&lower))
        {
            return Some(Violation::BotLink);
        }
        if content::has_hidden_link(&message.entities) {
            return Some(Violation::HiddenLink);
        }
        if content::has_link_text(&lower) {
            return Some(Violation::LinkText);
        }
        if self.profanity.contains_any(&message.text) {
            return Some(Violation::Profanity);
        }
        None
    }

    /// Delete `message`; a failed delete is logged and the verdict stands
    pub(crate) async fn remove(&self, message: &InboundMessage, violation: Violation) -> Verdict {
        if let Err(error) = platform_call(
            self.call_timeout,
            self.platform.delete_message(message.channel, message.id),
        )
        .await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %message.group,
                user_id = %message.sender.id,
                error = %error,
                "Failed to delete message"
            );
        }
        info!(
            target: MODERATION_TARGET,
            group_id = %message.group,
            user_id = %message.sender.id,
            violation = %violation,
            event = "deleted",
            "Message removed"
        );
        Verdict::Deleted(violation)
    }

    async fn warn(&self, message: &InboundMessage, violation: &Violation) {
        let Some(prompt) = violation_warning(
            violation,
            &message.sender,
            self.platform.invite_link().as_deref(),
        ) else {
            return;
        };
        if let Err(error) =
            platform_call(self.call_timeout, self.platform.send_prompt(message.channel, prompt))
                .await
        {
            debug!(
                target: MODERATION_TARGET,
                group_id = %message.group,
                error = %error,
                "Failed to post warning"
            );
        }
    }
}
