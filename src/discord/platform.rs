//! [`ChatPlatform`] over the Discord HTTP API

use std::num::NonZeroU64;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, ButtonStyle, Cache, CreateActionRow, CreateButton, CreateEmbed,
    CreateMessage, EditMember, EditMessage, Http, HttpError, Permissions, WebhookType,
};

use crate::moderation::{
    ChannelId, ChatPlatform, GroupId, MemberStatus, MessageId, PlatformError, PlatformResult,
    Prompt, PromptButton, UserId,
};

/// Cannot send messages to this user
const CANNOT_MESSAGE_USER: i64 = 50007;
const UNKNOWN_USER: i64 = 10013;
const UNKNOWN_MEMBER: i64 = 10007;

pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
    invite_url: Option<String>,
}

impl SerenityPlatform {
    #[must_use]
    pub const fn new(http: Arc<Http>, cache: Arc<Cache>, invite_url: Option<String>) -> Self {
        Self {
            http,
            cache,
            invite_url,
        }
    }

    fn cache_http(&self) -> (&Arc<Cache>, &Http) {
        (&self.cache, self.http.as_ref())
    }

    /// Owner and per-role permissions, from the cache when possible
    async fn guild_permissions(
        &self,
        guild: serenity::GuildId,
    ) -> PlatformResult<(serenity::UserId, Vec<(serenity::RoleId, Permissions)>)> {
        if let Some(cached) = self.cache.guild(guild) {
            let roles = cached
                .roles
                .iter()
                .map(|(id, role)| (*id, role.permissions))
                .collect();
            return Ok((cached.owner_id, roles));
        }
        let partial = guild.to_partial_guild(self.http.as_ref()).await.map_err(classify)?;
        let roles = partial
            .roles
            .iter()
            .map(|(id, role)| (*id, role.permissions))
            .collect();
        Ok((partial.owner_id, roles))
    }

    /// Status of `user` in `guild`, with an unknown member reported as gone
    async fn status_in(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
    ) -> PlatformResult<MemberStatus> {
        let (owner, roles) = self.guild_permissions(guild).await?;
        if owner == user {
            return Ok(MemberStatus::Creator);
        }

        let member = match guild.member(self.cache_http(), user).await {
            Ok(member) => member,
            Err(error) => {
                return match classify(error) {
                    PlatformError::NotFound(_) => Ok(MemberStatus::Left),
                    other => Err(other),
                };
            }
        };

        let admin = roles.iter().any(|(id, permissions)| {
            (member.roles.contains(id) || id.get() == guild.get())
                && (permissions.administrator() || permissions.manage_guild())
        });
        if admin {
            return Ok(MemberStatus::Administrator);
        }
        let timed_out = member
            .communication_disabled_until
            .is_some_and(|until| *until > Utc::now());
        Ok(if timed_out {
            MemberStatus::Restricted
        } else {
            MemberStatus::Member
        })
    }
}

fn nonzero(raw: u64) -> PlatformResult<NonZeroU64> {
    NonZeroU64::new(raw).ok_or_else(|| PlatformError::NotFound("id 0".to_string()))
}

fn guild_id(group: GroupId) -> PlatformResult<serenity::GuildId> {
    nonzero(group.0).map(serenity::GuildId::from)
}

fn user_id(user: UserId) -> PlatformResult<serenity::UserId> {
    nonzero(user.0).map(serenity::UserId::from)
}

fn channel_id(channel: ChannelId) -> PlatformResult<serenity::ChannelId> {
    nonzero(channel.0).map(serenity::ChannelId::from)
}

fn message_id(message: MessageId) -> PlatformResult<serenity::MessageId> {
    nonzero(message.0).map(serenity::MessageId::from)
}

/// Map a Discord error response to the kind of failure the core acts on
#[must_use]
pub fn classify_response(status: u16, code: i64, message: &str) -> Option<PlatformError> {
    match (status, code) {
        (_, CANNOT_MESSAGE_USER | UNKNOWN_USER) => {
            Some(PlatformError::Unreachable(message.to_string()))
        }
        (_, UNKNOWN_MEMBER) | (404, _) => Some(PlatformError::NotFound(message.to_string())),
        (403, _) => Some(PlatformError::Forbidden(message.to_string())),
        _ => None,
    }
}

pub(crate) fn classify(error: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &error {
        let code = i64::try_from(response.error.code).unwrap_or_default();
        if let Some(classified) =
            classify_response(response.status_code.as_u16(), code, &response.error.message)
        {
            return classified;
        }
    }
    PlatformError::from(error)
}

fn prompt_rows(buttons: &[PromptButton]) -> Vec<CreateActionRow> {
    buttons
        .iter()
        .map(|button| {
            let button = match button {
                PromptButton::Link { label, url } => {
                    CreateButton::new_link(url.clone()).label(label.clone())
                }
                PromptButton::Callback { label, data } => CreateButton::new(data.clone())
                    .label(label.clone())
                    .style(ButtonStyle::Secondary),
            };
            CreateActionRow::Buttons(vec![button])
        })
        .collect()
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        channel_id(channel)?
            .delete_message(self.http.as_ref(), message_id(message)?)
            .await
            .map_err(classify)
    }

    async fn restrict_member(
        &self,
        group: GroupId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> PlatformResult<()> {
        let builder = EditMember::new().disable_communication_until_datetime(until.into());
        guild_id(group)?
            .edit_member(self.cache_http(), user_id(user)?, builder)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn lift_restriction(&self, group: GroupId, user: UserId) -> PlatformResult<()> {
        guild_id(group)?
            .edit_member(
                self.cache_http(),
                user_id(user)?,
                EditMember::new().enable_communication(),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn member_status(&self, group: GroupId, user: UserId) -> PlatformResult<MemberStatus> {
        self.status_in(guild_id(group)?, user_id(user)?).await
    }

    /// Required channels are other servers; membership means being in that server
    async fn channel_membership(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> PlatformResult<MemberStatus> {
        let guild = serenity::GuildId::from(nonzero(channel.0)?);
        match guild.member(self.cache_http(), user_id(user)?).await {
            Ok(member) if member.communication_disabled_until.is_some_and(|t| *t > Utc::now()) => {
                Ok(MemberStatus::Restricted)
            }
            Ok(_) => Ok(MemberStatus::Member),
            Err(error) => match classify(error) {
                PlatformError::NotFound(_) => Ok(MemberStatus::Left),
                other => Err(other),
            },
        }
    }

    async fn send_prompt(&self, channel: ChannelId, prompt: Prompt) -> PlatformResult<MessageId> {
        let builder = CreateMessage::new()
            .content(prompt.text)
            .components(prompt_rows(&prompt.buttons));
        let sent = channel_id(channel)?
            .send_message(self.http.as_ref(), builder)
            .await
            .map_err(classify)?;
        Ok(MessageId(sent.id.get()))
    }

    async fn edit_prompt(
        &self,
        channel: ChannelId,
        message: MessageId,
        text: String,
    ) -> PlatformResult<()> {
        channel_id(channel)?
            .edit_message(
                self.http.as_ref(),
                message_id(message)?,
                EditMessage::new().content(text).components(Vec::new()),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    /// The announcement channel this server follows, if any
    async fn linked_channel(&self, group: GroupId) -> PlatformResult<Option<ChannelId>> {
        let webhooks = guild_id(group)?
            .webhooks(self.http.as_ref())
            .await
            .map_err(classify)?;
        Ok(webhooks
            .iter()
            .filter(|webhook| webhook.kind == WebhookType::ChannelFollower)
            .find_map(|webhook| webhook.source_channel.as_ref())
            .map(|source| ChannelId(source.id.get())))
    }

    async fn send_direct(&self, user: UserId, text: String) -> PlatformResult<()> {
        user_id(user)?
            .direct_message(self.cache_http(), CreateMessage::new().content(text))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn copy_direct(
        &self,
        user: UserId,
        from_channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<()> {
        let original = channel_id(from_channel)?
            .message(self.cache_http(), message_id(message)?)
            .await
            .map_err(classify)?;

        let mut content = original.content.clone();
        for attachment in &original.attachments {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&attachment.url);
        }
        let embeds: Vec<CreateEmbed> = original.embeds.into_iter().map(CreateEmbed::from).collect();
        if content.is_empty() && embeds.is_empty() {
            return Err(PlatformError::Other(format!(
                "Message {message} has nothing to copy"
            )));
        }

        user_id(user)?
            .direct_message(
                self.cache_http(),
                CreateMessage::new().content(content).embeds(embeds),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    fn invite_link(&self) -> Option<String> {
        self.invite_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_dms_are_unreachable() {
        let error = classify_response(403, CANNOT_MESSAGE_USER, "Cannot send messages to this user");
        assert!(error.is_some_and(|e| e.is_unreachable()));
        assert!(matches!(
            classify_response(404, UNKNOWN_USER, "Unknown User"),
            Some(PlatformError::Unreachable(_))
        ));
    }

    #[test]
    fn test_status_codes() {
        assert!(matches!(
            classify_response(404, 10008, "Unknown Message"),
            Some(PlatformError::NotFound(_))
        ));
        assert!(matches!(
            classify_response(404, UNKNOWN_MEMBER, "Unknown Member"),
            Some(PlatformError::NotFound(_))
        ));
        assert!(matches!(
            classify_response(403, 50013, "Missing Permissions"),
            Some(PlatformError::Forbidden(_))
        ));
        assert!(classify_response(500, 0, "Internal").is_none());
    }

    #[test]
    fn test_zero_ids_are_rejected() {
        assert!(guild_id(GroupId(0)).is_err());
        assert_eq!(
            channel_id(ChannelId(5)).map(serenity::ChannelId::get).ok(),
            Some(5)
        );
    }

    #[test]
    fn test_each_prompt_button_gets_a_row() {
        let prompt = Prompt::new("hi")
            .callback("Check", "noop")
            .link("Invite", "https://discord.com/oauth2/authorize?client_id=1");
        assert_eq!(prompt_rows(&prompt.buttons).len(), 2);
    }
}
