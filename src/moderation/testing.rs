//! Test doubles shared by the moderation tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    ChannelId, ChatPlatform, GroupId, InboundMessage, MemberStatus, MessageId, PlatformError,
    PlatformResult, Prompt, Sender, UserId,
};

/// A side effect recorded by [`FakePlatform`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Delete(ChannelId, MessageId),
    Restrict(GroupId, UserId, DateTime<Utc>),
    Lift(GroupId, UserId),
    Prompt(ChannelId, Prompt),
    Edit(ChannelId, MessageId, String),
    Direct(UserId, String),
    Copy(UserId, ChannelId, MessageId),
}

/// In-memory platform that records every side effect
#[derive(Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<PlatformCall>>,
    admins: Mutex<HashSet<(GroupId, UserId)>>,
    memberships: Mutex<HashSet<(ChannelId, UserId)>>,
    broken_channels: Mutex<HashSet<ChannelId>>,
    unreachable: Mutex<HashSet<UserId>>,
    flaky: Mutex<HashSet<UserId>>,
    linked: Mutex<HashMap<GroupId, ChannelId>>,
    admin_lookups_fail: AtomicBool,
    restrictions_fail: AtomicBool,
    next_message: AtomicU64,
}

impl FakePlatform {
    pub fn make_admin(&self, group: GroupId, user: UserId) {
        lock(&self.admins).insert((group, user));
    }

    pub fn join_channel(&self, channel: ChannelId, user: UserId) {
        lock(&self.memberships).insert((channel, user));
    }

    /// Membership lookups in `channel` fail
    pub fn break_channel(&self, channel: ChannelId) {
        lock(&self.broken_channels).insert(channel);
    }

    /// Direct messages to `user` fail as unreachable
    pub fn make_unreachable(&self, user: UserId) {
        lock(&self.unreachable).insert(user);
    }

    /// Direct messages to `user` fail with a transient error
    pub fn make_flaky(&self, user: UserId) {
        lock(&self.flaky).insert(user);
    }

    pub fn link_channel(&self, group: GroupId, channel: ChannelId) {
        lock(&self.linked).insert(group, channel);
    }

    pub fn fail_admin_lookups(&self) {
        self.admin_lookups_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_restrictions(&self) {
        self.restrictions_fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    pub fn deleted(&self, channel: ChannelId, message: MessageId) -> bool {
        self.calls()
            .contains(&PlatformCall::Delete(channel, message))
    }

    /// Texts of every prompt sent so far
    pub fn prompts(&self) -> Vec<Prompt> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Prompt(_, prompt) => Some(prompt),
                _ => None,
            })
            .collect()
    }

    pub fn restrictions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PlatformCall::Restrict(..)))
            .count()
    }

    fn record(&self, call: PlatformCall) {
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        self.record(PlatformCall::Delete(channel, message));
        Ok(())
    }

    async fn restrict_member(
        &self,
        group: GroupId,
        user: UserId,
        until: DateTime<Utc>,
    ) -> PlatformResult<()> {
        if self.restrictions_fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Forbidden("missing moderate members".to_string()));
        }
        self.record(PlatformCall::Restrict(group, user, until));
        Ok(())
    }

    async fn lift_restriction(&self, group: GroupId, user: UserId) -> PlatformResult<()> {
        self.record(PlatformCall::Lift(group, user));
        Ok(())
    }

    async fn member_status(&self, group: GroupId, user: UserId) -> PlatformResult<MemberStatus> {
        if self.admin_lookups_fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Other("lookup failed".to_string()));
        }
        if lock(&self.admins).contains(&(group, user)) {
            Ok(MemberStatus::Administrator)
        } else {
            Ok(MemberStatus::Member)
        }
    }

    async fn channel_membership(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> PlatformResult<MemberStatus> {
        if lock(&self.broken_channels).contains(&channel) {
            return Err(PlatformError::Other("channel lookup failed".to_string()));
        }
        if lock(&self.memberships).contains(&(channel, user)) {
            Ok(MemberStatus::Member)
        } else {
            Ok(MemberStatus::Left)
        }
    }

    async fn send_prompt(&self, channel: ChannelId, prompt: Prompt) -> PlatformResult<MessageId> {
        self.record(PlatformCall::Prompt(channel, prompt));
        Ok(MessageId(
            10_000 + self.next_message.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn edit_prompt(
        &self,
        channel: ChannelId,
        message: MessageId,
        text: String,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::Edit(channel, message, text));
        Ok(())
    }

    async fn linked_channel(&self, group: GroupId) -> PlatformResult<Option<ChannelId>> {
        Ok(lock(&self.linked).get(&group).copied())
    }

    async fn send_direct(&self, user: UserId, text: String) -> PlatformResult<()> {
        if lock(&self.unreachable).contains(&user) {
            return Err(PlatformError::Unreachable(format!("user {user} blocked the bot")));
        }
        if lock(&self.flaky).contains(&user) {
            return Err(PlatformError::Timeout);
        }
        self.record(PlatformCall::Direct(user, text));
        Ok(())
    }

    async fn copy_direct(
        &self,
        user: UserId,
        from_channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<()> {
        if lock(&self.unreachable).contains(&user) {
            return Err(PlatformError::Unreachable(format!("user {user} blocked the bot")));
        }
        self.record(PlatformCall::Copy(user, from_channel, message));
        Ok(())
    }

    fn invite_link(&self) -> Option<String> {
        Some("https://discord.com/oauth2/authorize?client_id=1".to_string())
    }
}

pub fn sender(id: u64) -> Sender {
    Sender {
        id: UserId(id),
        username: Some(format!("user{id}")),
        display_name: format!("User {id}"),
        is_bot: false,
    }
}

/// A plain text message from user `user` in channel 1 of `group`
pub fn message(group: GroupId, user: u64, id: u64, text: &str) -> InboundMessage {
    InboundMessage::text(group, ChannelId(1), MessageId(id), sender(user), text)
}
