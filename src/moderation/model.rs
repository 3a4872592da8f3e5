//! Platform-neutral identifiers and the inbound message model

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// A moderated community (a Discord server)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct GroupId(pub u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// A channel inside a group, or a required community a user must belong to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

/// The human (or bot account) a message is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub username: Option<String>,
    pub display_name: String,
    pub is_bot: bool,
}

impl Sender {
    /// Human-readable label used in warning texts
    #[must_use]
    pub fn label(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => format!("@{username}"),
            _ if !self.display_name.is_empty() => self.display_name.clone(),
            _ => format!("user {}", self.id),
        }
    }
}

/// Who a message was posted on behalf of, when it is not the sender personally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostedAs {
    /// The group itself (anonymous admins, server integrations)
    Group,
    /// A broadcast channel
    Channel(ChannelId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Url,
    TextLink,
    Mention,
    Other,
}

/// A formatted span of the message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub url: Option<String>,
}

impl Entity {
    #[must_use]
    pub const fn is_link(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Url | EntityKind::TextLink | EntityKind::Mention
        )
    }
}

/// An inline button attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Button {
    pub url: Option<String>,
    pub web_app_url: Option<String>,
    /// Launches a game or activity instead of opening a link
    pub launches_game: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Regular,
    /// "X joined the server" notices
    ServiceJoin,
    ServiceLeave,
}

/// A message observed in a moderated group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub group: GroupId,
    pub channel: ChannelId,
    pub id: MessageId,
    pub sender: Sender,
    pub posted_as: Option<PostedAs>,
    /// Copied in automatically from a followed broadcast channel
    pub automatic_forward: bool,
    pub forward_origin: Option<ChannelId>,
    /// The bot that produced this message on the sender's behalf
    pub via_bot: Option<UserId>,
    pub text: String,
    pub entities: Vec<Entity>,
    pub buttons: Vec<Button>,
    pub has_game: bool,
    pub kind: MessageKind,
}

impl InboundMessage {
    /// A plain text message with no attachments
    #[must_use]
    pub fn text(
        group: GroupId,
        channel: ChannelId,
        id: MessageId,
        sender: Sender,
        text: impl Into<String>,
    ) -> Self {
        Self {
            group,
            channel,
            id,
            sender,
            posted_as: None,
            automatic_forward: false,
            forward_origin: None,
            via_bot: None,
            text: text.into(),
            entities: Vec::new(),
            buttons: Vec::new(),
            has_game: false,
            kind: MessageKind::Regular,
        }
    }
}

/// Membership of a user in a group or required channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    /// Present but currently muted
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }

    /// Counts as present for the channel gate
    #[must_use]
    pub const fn is_member(self) -> bool {
        matches!(
            self,
            Self::Creator | Self::Administrator | Self::Member | Self::Restricted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(username: Option<&str>, display_name: &str) -> Sender {
        Sender {
            id: UserId(42),
            username: username.map(str::to_string),
            display_name: display_name.to_string(),
            is_bot: false,
        }
    }

    #[test]
    fn test_sender_label() {
        assert_eq!(sender(Some("kit"), "Kit").label(), "@kit");
        assert_eq!(sender(None, "Kit").label(), "Kit");
        assert_eq!(sender(Some(""), "").label(), "user 42");
    }

    #[test]
    fn test_member_status() {
        assert!(MemberStatus::Creator.is_admin());
        assert!(!MemberStatus::Member.is_admin());
        assert!(MemberStatus::Restricted.is_member());
        assert!(!MemberStatus::Left.is_member());
        assert!(!MemberStatus::Banned.is_member());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let yaml = serde_yaml::to_string(&GroupId(7)).expect("Failed to serialize");
        assert_eq!(yaml.trim(), "7");
        assert_eq!(ChannelId::from(9).to_string(), "9");
    }
}
