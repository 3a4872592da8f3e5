//! The chat platform seen by the moderation core
//!
//! Everything the core does to the outside world goes through [`ChatPlatform`]:
//! deleting messages, muting members, posting prompts and direct messages. The
//! Discord implementation lives in `crate::discord`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChannelId, GroupId, MemberStatus, MessageId, PlatformResult, UserId};

/// A button under a prompt message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptButton {
    /// Opens a link
    Link { label: String, url: String },
    /// Calls back into the bot with `data`
    Callback { label: String, data: String },
}

/// A warning or instruction posted into a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub buttons: Vec<PromptButton>,
}

impl Prompt {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    #[must_use]
    pub fn link(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(PromptButton::Link {
            label: label.into(),
            url: url.into(),
        });
        self
    }

    #[must_use]
    pub fn callback(mut self, label: impl Into<String>, data: impl Into<String>) -> Self {
        self.buttons.push(PromptButton::Callback {
            label: label.into(),
            data: data.into(),
        });
        self
    }
}

/// Side effects on the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()>;

    /// Prevent `user` from posting in `group` until `until`
    async fn restrict_member(
        &self,
        group: GroupId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> PlatformResult<()>;

    async fn lift_restriction(&self, group: GroupId, user: UserId) -> PlatformResult<()>;

    /// Status of `user` inside `group`
    async fn member_status(&self, group: GroupId, user: UserId) -> PlatformResult<MemberStatus>;

    /// Status of `user` in a required channel
    async fn channel_membership(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> PlatformResult<MemberStatus>;

    async fn send_prompt(&self, channel: ChannelId, prompt: Prompt) -> PlatformResult<MessageId>;

    /// Replace the text of a prompt and drop its buttons
    async fn edit_prompt(
        &self,
        channel: ChannelId,
        message: MessageId,
        text: String,
    ) -> PlatformResult<()>;

    /// The broadcast channel linked to `group`, if any
    async fn linked_channel(&self, group: GroupId) -> PlatformResult<Option<ChannelId>>;

    async fn send_direct(&self, user: UserId, text: String) -> PlatformResult<()>;

    /// Re-post an existing message into `user`'s direct messages
    async fn copy_direct(
        &self,
        user: UserId,
        from_channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<()>;

    /// Link that adds the bot to another group
    fn invite_link(&self) -> Option<String>;
}
