//! Restriction state machine
//!
//! A user is either unrestricted or restricted until a wall-clock instant.
//! Expiry is lazy: nothing fires when `until` passes, the next observation
//! clears the record. Transitions for one `(group, user)` pair are
//! serialised with [`RestrictionMachine::lock`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::error::{platform_call, store_call};
use super::{ChannelId, ChatPlatform, GroupId, MessageId, PersistentStore, Prompt, UserId};
use crate::MODERATION_TARGET;

/// A persisted restriction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionRecord {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub until: DateTime<Utc>,
}

impl RestrictionRecord {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionState {
    Unrestricted,
    Restricted { until: DateTime<Utc> },
}

impl RestrictionState {
    #[must_use]
    pub const fn is_restricted(self) -> bool {
        matches!(self, Self::Restricted { .. })
    }
}

/// Why a restriction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Expired,
    Privileged,
    ThresholdReached,
    ChannelsSatisfied,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::Privileged => write!(f, "privileged"),
            Self::ThresholdReached => write!(f, "threshold_reached"),
            Self::ChannelsSatisfied => write!(f, "channels_satisfied"),
        }
    }
}

/// The gate that posted a tracked warning prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Referral,
    Channels,
}

type MemberKey = (GroupId, UserId);

/// Holds the transition lock of one `(group, user)` pair
///
/// The lock entry is dropped from the table once nobody else holds or waits
/// for it.
pub struct TransitionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<MemberKey, Arc<Mutex<()>>>>,
    key: MemberKey,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct RestrictionMachine {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ChatPlatform>,
    duration: chrono::Duration,
    call_timeout: Duration,
    /// Records as last seen, served while the store is down
    fallback: DashMap<MemberKey, DateTime<Utc>>,
    prompts: DashMap<(GroupId, UserId, PromptKind), (ChannelId, MessageId)>,
    locks: Arc<DashMap<MemberKey, Arc<Mutex<()>>>>,
}

impl RestrictionMachine {
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        platform: Arc<dyn ChatPlatform>,
        duration: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            duration: chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            call_timeout,
            fallback: DashMap::new(),
            prompts: DashMap::new(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive use of the `(group, user)` pair
    pub async fn lock(&self, group: GroupId, user: UserId) -> TransitionGuard {
        let key = (group, user);
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        TransitionGuard {
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
            key,
        }
    }

    /// Current state of `user`; an expired record is cleared on the way
    pub async fn observe(&self, group: GroupId, user: UserId, now: DateTime<Utc>) -> RestrictionState {
        let until = match store_call(self.call_timeout, self.store.restriction_until(group, user)).await {
            Ok(until) => {
                match until {
                    Some(until) => self.fallback.insert((group, user), until),
                    None => self.fallback.remove(&(group, user)).map(|(_, until)| until),
                };
                until
            }
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Restriction lookup failed, using local state"
                );
                self.fallback.get(&(group, user)).map(|entry| *entry)
            }
        };

        match until {
            Some(until) if now < until => RestrictionState::Restricted { until },
            Some(_) => {
                self.release(group, user, ReleaseReason::Expired).await;
                RestrictionState::Unrestricted
            }
            None => RestrictionState::Unrestricted,
        }
    }

    /// Restrict `user` for the configured duration starting at `now`
    ///
    /// The platform restriction uses the same `until` as the stored record.
    /// A failed platform call is logged; the record stands either way.
    pub async fn restrict(&self, group: GroupId, user: UserId, now: DateTime<Utc>) -> RestrictionRecord {
        let record = RestrictionRecord {
            group_id: group,
            user_id: user,
            until: now + self.duration,
        };
        self.fallback.insert((group, user), record.until);

        if let Err(error) =
            store_call(self.call_timeout, self.store.upsert_restriction(record.clone())).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                user_id = %user,
                error = %error,
                "Failed to persist restriction"
            );
        }
        if let Err(error) = platform_call(
            self.call_timeout,
            self.platform.restrict_member(group, user, record.until),
        )
        .await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                user_id = %user,
                error = %error,
                "Failed to restrict member on the platform"
            );
        }

        info!(
            target: MODERATION_TARGET,
            group_id = %group,
            user_id = %user,
            until = %record.until,
            event = "restricted",
            "User restricted"
        );
        record
    }

    /// Release `user` only while a restriction is in force
    ///
    /// Returns whether a restriction was lifted. An expired record is cleared
    /// by the observation and does not count.
    pub async fn release_if_restricted(
        &self,
        group: GroupId,
        user: UserId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.observe(group, user, now).await.is_restricted() {
            return false;
        }
        self.release(group, user, reason).await;
        true
    }

    /// Clear the record; every reason except expiry also lifts the platform restriction
    ///
    /// Prompts posted for the restriction are no longer tracked afterwards.
    pub async fn release(&self, group: GroupId, user: UserId, reason: ReleaseReason) {
        self.fallback.remove(&(group, user));
        self.prompts.retain(|(g, u, _), _| *g != group || *u != user);
        if let Err(error) =
            store_call(self.call_timeout, self.store.delete_restriction(group, user)).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                user_id = %user,
                error = %error,
                "Failed to clear restriction record"
            );
        }

        if reason != ReleaseReason::Expired {
            if let Err(error) =
                platform_call(self.call_timeout, self.platform.lift_restriction(group, user)).await
            {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Failed to lift platform restriction"
                );
            }
        }

        info!(
            target: MODERATION_TARGET,
            group_id = %group,
            user_id = %user,
            reason = %reason,
            event = "released",
            "Restriction released"
        );
    }

    /// Post `prompt` for `user`, deleting the previous prompt of the same kind first
    pub async fn replace_prompt(
        &self,
        group: GroupId,
        user: UserId,
        kind: PromptKind,
        channel: ChannelId,
        prompt: Prompt,
    ) -> Option<MessageId> {
        let key = (group, user, kind);
        if let Some((_, (old_channel, old_message))) = self.prompts.remove(&key) {
            if let Err(error) = platform_call(
                self.call_timeout,
                self.platform.delete_message(old_channel, old_message),
            )
            .await
            {
                debug!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Previous prompt already gone"
                );
            }
        }

        match platform_call(self.call_timeout, self.platform.send_prompt(channel, prompt)).await {
            Ok(message) => {
                self.prompts.insert(key, (channel, message));
                Some(message)
            }
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Failed to send prompt"
                );
                None
            }
        }
    }

    /// Stop tracking a prompt so it survives the next [`replace_prompt`](Self::replace_prompt)
    pub fn forget_prompt(&self, group: GroupId, user: UserId, kind: PromptKind) {
        self.prompts.remove(&(group, user, kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::store::MockPersistentStore;
    use crate::moderation::testing::{FakePlatform, PlatformCall};
    use crate::moderation::{StoreError, YamlStore};

    const GROUP: GroupId = GroupId(1);
    const USER: UserId = UserId(2);

    fn machine(platform: Arc<FakePlatform>) -> (RestrictionMachine, Arc<YamlStore>) {
        let store = Arc::new(YamlStore::in_memory());
        let machine = RestrictionMachine::new(
            store.clone(),
            platform,
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        (machine, store)
    }

    #[tokio::test]
    async fn test_restrict_then_observe() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, store) = machine(platform.clone());
        let now = Utc::now();

        let record = machine.restrict(GROUP, USER, now).await;
        assert_eq!(record.until, now + chrono::Duration::seconds(60));
        assert!(record.is_active(now));
        assert_eq!(
            store.restriction_until(GROUP, USER).await.ok(),
            Some(Some(record.until))
        );
        assert!(platform.calls().contains(&PlatformCall::Restrict(GROUP, USER, record.until)));

        let state = machine.observe(GROUP, USER, now + chrono::Duration::seconds(30)).await;
        assert_eq!(state, RestrictionState::Restricted { until: record.until });
    }

    #[tokio::test]
    async fn test_expiry_is_lazy() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, store) = machine(platform.clone());
        let now = Utc::now();
        machine.restrict(GROUP, USER, now).await;

        // Still stored after `until` has passed until someone looks
        let later = now + chrono::Duration::seconds(61);
        assert!(store.restriction_until(GROUP, USER).await.ok().flatten().is_some());

        assert_eq!(machine.observe(GROUP, USER, later).await, RestrictionState::Unrestricted);
        assert_eq!(store.restriction_until(GROUP, USER).await.ok(), Some(None));
        // Expiry does not call the platform
        assert!(!platform.calls().contains(&PlatformCall::Lift(GROUP, USER)));
    }

    #[tokio::test]
    async fn test_release_lifts_platform_restriction() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, store) = machine(platform.clone());
        let now = Utc::now();
        machine.restrict(GROUP, USER, now).await;

        machine.release(GROUP, USER, ReleaseReason::Privileged).await;
        assert_eq!(store.restriction_until(GROUP, USER).await.ok(), Some(None));
        assert!(platform.calls().contains(&PlatformCall::Lift(GROUP, USER)));
        assert_eq!(machine.observe(GROUP, USER, now).await, RestrictionState::Unrestricted);
    }

    #[tokio::test]
    async fn test_restriction_held_locally_during_outage() {
        let mut store = MockPersistentStore::new();
        store
            .expect_upsert_restriction()
            .returning(|_| Err(StoreError::Unavailable("offline".to_string())));
        store
            .expect_restriction_until()
            .returning(|_, _| Err(StoreError::Unavailable("offline".to_string())));
        let machine = RestrictionMachine::new(
            Arc::new(store),
            Arc::new(FakePlatform::default()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let now = Utc::now();

        let record = machine.restrict(GROUP, USER, now).await;
        let state = machine.observe(GROUP, USER, now).await;
        assert_eq!(state, RestrictionState::Restricted { until: record.until });
    }

    #[tokio::test]
    async fn test_platform_failure_keeps_record() {
        let platform = Arc::new(FakePlatform::default());
        platform.fail_restrictions();
        let (machine, store) = machine(platform);
        let now = Utc::now();

        let record = machine.restrict(GROUP, USER, now).await;
        assert_eq!(
            store.restriction_until(GROUP, USER).await.ok(),
            Some(Some(record.until))
        );
    }

    #[tokio::test]
    async fn test_replace_prompt_deletes_previous() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, _) = machine(platform.clone());
        let channel = ChannelId(9);

        let first = machine
            .replace_prompt(GROUP, USER, PromptKind::Referral, channel, Prompt::new("one"))
            .await
            .expect("prompt sent");
        let second = machine
            .replace_prompt(GROUP, USER, PromptKind::Referral, channel, Prompt::new("two"))
            .await
            .expect("prompt sent");

        assert_ne!(first, second);
        assert!(platform.calls().contains(&PlatformCall::Delete(channel, first)));
        assert!(!platform.calls().contains(&PlatformCall::Delete(channel, second)));

        // Other kinds are tracked separately
        machine
            .replace_prompt(GROUP, USER, PromptKind::Channels, channel, Prompt::new("three"))
            .await;
        assert!(!platform.calls().contains(&PlatformCall::Delete(channel, second)));
    }

    #[tokio::test]
    async fn test_release_if_restricted_skips_free_users() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, _) = machine(platform.clone());
        let now = Utc::now();

        assert!(
            !machine
                .release_if_restricted(GROUP, USER, ReleaseReason::Privileged, now)
                .await
        );
        assert!(platform.calls().is_empty());

        machine.restrict(GROUP, USER, now).await;
        assert!(
            machine
                .release_if_restricted(GROUP, USER, ReleaseReason::Privileged, now)
                .await
        );
        assert!(platform.calls().contains(&PlatformCall::Lift(GROUP, USER)));
    }

    #[tokio::test]
    async fn test_release_stops_tracking_prompts() {
        let platform = Arc::new(FakePlatform::default());
        let (machine, _) = machine(platform);
        let now = Utc::now();
        machine.restrict(GROUP, USER, now).await;
        machine
            .replace_prompt(GROUP, USER, PromptKind::Referral, ChannelId(9), Prompt::new("one"))
            .await;
        machine
            .replace_prompt(GROUP, UserId(3), PromptKind::Referral, ChannelId(9), Prompt::new("two"))
            .await;
        assert_eq!(machine.prompts.len(), 2);

        machine.release(GROUP, USER, ReleaseReason::Expired).await;
        assert_eq!(machine.prompts.len(), 1);
        assert!(machine.prompts.contains_key(&(GROUP, UserId(3), PromptKind::Referral)));
    }

    #[tokio::test]
    async fn test_lock_serialises_transitions() {
        let (machine, _) = machine(Arc::new(FakePlatform::default()));
        let machine = Arc::new(machine);

        let guard = machine.lock(GROUP, USER).await;
        let contender = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move {
                let _guard = machine.lock(GROUP, USER).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // A different user is not blocked
        drop(machine.lock(GROUP, UserId(3)).await);

        drop(guard);
        contender.await.expect("contender finished");
        assert!(machine.locks.is_empty());
    }
}
