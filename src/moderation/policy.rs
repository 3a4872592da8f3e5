//! Per-group moderation policy with a short-lived read-through cache
//!
//! Reads are served from memory for `ttl` after a successful fetch. When the
//! store is down, the last value seen is served even if it has expired; a
//! group that was never seen falls back to the defaults. Writes update the
//! cache first, so the writer reads its own write immediately. A write is
//! persisted only when the stored row it merges onto is known.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::store_call;
use super::{ChannelId, ConfigurationError, GroupId, PersistentStore, StoreResult};
use crate::MODERATION_TARGET;

/// Smallest referral threshold an operator may configure
pub const MIN_REFERRAL_THRESHOLD: u32 = 3;
/// Largest referral threshold an operator may configure
pub const MAX_REFERRAL_THRESHOLD: u32 = 30;

/// Moderation settings of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    pub group_id: GroupId,
    #[serde(default)]
    pub night_mode: bool,
    /// Empty means channel gating is off
    #[serde(default)]
    pub required_channels: Vec<ChannelId>,
    /// Zero means referral gating is off
    #[serde(default)]
    pub referral_threshold: u32,
}

impl GroupPolicy {
    /// Policy of a group nobody has configured yet
    #[must_use]
    pub const fn defaults(group_id: GroupId) -> Self {
        Self {
            group_id,
            night_mode: false,
            required_channels: Vec::new(),
            referral_threshold: 0,
        }
    }

    #[must_use]
    pub fn channel_gating_enabled(&self) -> bool {
        !self.required_channels.is_empty()
    }

    #[must_use]
    pub const fn referral_gating_enabled(&self) -> bool {
        self.referral_threshold > 0
    }
}

/// A field of a partial policy update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Keep the stored value
    #[default]
    Unchanged,
    SetTo(T),
}

impl<T> FieldUpdate<T> {
    fn apply(self, target: &mut T) {
        if let Self::SetTo(value) = self {
            *target = value;
        }
    }
}

/// A partial policy update; fields left `Unchanged` keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub night_mode: FieldUpdate<bool>,
    /// `SetTo(Vec::new())` turns channel gating off
    pub required_channels: FieldUpdate<Vec<ChannelId>>,
    /// `SetTo(0)` turns referral gating off
    pub referral_threshold: FieldUpdate<u32>,
}

impl PolicyUpdate {
    #[must_use]
    pub fn night_mode(enabled: bool) -> Self {
        Self {
            night_mode: FieldUpdate::SetTo(enabled),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn required_channels(channels: Vec<ChannelId>) -> Self {
        Self {
            required_channels: FieldUpdate::SetTo(channels),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn referral_threshold(threshold: u32) -> Self {
        Self {
            referral_threshold: FieldUpdate::SetTo(threshold),
            ..Self::default()
        }
    }

    fn apply_to(self, policy: &mut GroupPolicy) {
        self.night_mode.apply(&mut policy.night_mode);
        self.required_channels.apply(&mut policy.required_channels);
        self.referral_threshold.apply(&mut policy.referral_threshold);
        policy.required_channels = dedup_channels(std::mem::take(&mut policy.required_channels));
    }
}

/// Check an operator-supplied referral threshold
///
/// # Errors
/// Returns [`ConfigurationError::ThresholdOutOfRange`] outside `3..=30`
pub fn validate_threshold(threshold: u32) -> Result<u32, ConfigurationError> {
    if threshold < MIN_REFERRAL_THRESHOLD || threshold > MAX_REFERRAL_THRESHOLD {
        return Err(ConfigurationError::ThresholdOutOfRange(threshold));
    }
    Ok(threshold)
}

/// Parse a list of channel ids separated by spaces or commas
///
/// Accepts raw ids and `<#id>` mentions. Duplicates are dropped, order is kept.
///
/// # Errors
/// Returns an error for an empty list or a token that is not an id
pub fn parse_channel_list(raw: &str) -> Result<Vec<ChannelId>, ConfigurationError> {
    let mut channels = Vec::new();
    for token in raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
    {
        let trimmed = token
            .strip_prefix("<#")
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(token);
        let id = trimmed
            .parse::<u64>()
            .map_err(|_| ConfigurationError::InvalidChannel(token.to_string()))?;
        channels.push(ChannelId(id));
    }
    if channels.is_empty() {
        return Err(ConfigurationError::NoChannels);
    }
    Ok(dedup_channels(channels))
}

fn dedup_channels(channels: Vec<ChannelId>) -> Vec<ChannelId> {
    let mut seen = std::collections::HashSet::new();
    channels
        .into_iter()
        .filter(|channel| seen.insert(*channel))
        .collect()
}

#[derive(Debug, Clone)]
struct CachedPolicy {
    policy: GroupPolicy,
    fetched_at: Instant,
    /// False when the value was merged onto defaults while the store was down
    confirmed: bool,
}

/// Read-through cache in front of the persisted group policies
pub struct PolicyStore {
    store: Arc<dyn PersistentStore>,
    cache: DashMap<GroupId, CachedPolicy>,
    /// Serialises read-merge-write in [`set`](Self::set)
    writes: Mutex<()>,
    ttl: Duration,
    call_timeout: Duration,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("cached_groups", &self.cache.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PolicyStore {
    #[must_use]
    pub fn new(store: Arc<dyn PersistentStore>, ttl: Duration, call_timeout: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            writes: Mutex::new(()),
            ttl,
            call_timeout,
        }
    }

    /// Current policy of `group`; never fails
    pub async fn get(&self, group: GroupId) -> GroupPolicy {
        let cached = self
            .cache
            .get(&group)
            .map(|entry| (entry.policy.clone(), entry.fetched_at));
        if let Some((policy, fetched_at)) = &cached {
            if fetched_at.elapsed() < self.ttl {
                return policy.clone();
            }
        }

        let started = Instant::now();
        match self.fetch(group).await {
            Ok(policy) => self.remember(group, policy, started),
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    error = %error,
                    stale = cached.is_some(),
                    "Policy fetch failed, serving last known policy"
                );
                cached.map_or_else(|| GroupPolicy::defaults(group), |(policy, _)| policy)
            }
        }
    }

    /// Apply a partial update and return the merged policy
    ///
    /// The cache is updated before the persistent write, so a following
    /// [`get`](Self::get) sees the new value even if the write fails. When
    /// the stored row cannot be read and nothing confirmed is cached, the
    /// update is kept in memory only so the other stored fields survive.
    pub async fn set(&self, group: GroupId, update: PolicyUpdate) -> GroupPolicy {
        let _writer = self.writes.lock().await;
        let (mut policy, confirmed) = self.merge_base(group).await;
        update.apply_to(&mut policy);

        self.cache.insert(
            group,
            CachedPolicy {
                policy: policy.clone(),
                fetched_at: Instant::now(),
                confirmed,
            },
        );

        if !confirmed {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                "Stored policy unknown, update kept in memory only"
            );
            return policy;
        }
        if let Err(error) = store_call(self.call_timeout, self.store.save_policy(policy.clone())).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                error = %error,
                "Failed to persist policy update"
            );
        }
        policy
    }

    /// Policy to merge an update onto, and whether it reflects the stored row
    async fn merge_base(&self, group: GroupId) -> (GroupPolicy, bool) {
        let cached = self.cache.get(&group).map(|entry| entry.value().clone());
        if let Some(entry) = &cached {
            if entry.confirmed && entry.fetched_at.elapsed() < self.ttl {
                return (entry.policy.clone(), true);
            }
        }

        match self.fetch(group).await {
            Ok(policy) => (policy, true),
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    error = %error,
                    "Policy fetch before update failed"
                );
                cached.map_or_else(
                    || (GroupPolicy::defaults(group), false),
                    |entry| (entry.policy, entry.confirmed),
                )
            }
        }
    }

    /// Drop the cached entry so the next read goes to the store
    pub fn invalidate(&self, group: GroupId) {
        self.cache.remove(&group);
    }

    async fn fetch(&self, group: GroupId) -> StoreResult<GroupPolicy> {
        if let Some(policy) = store_call(self.call_timeout, self.store.load_policy(group)).await? {
            return Ok(policy);
        }
        debug!(target: MODERATION_TARGET, group_id = %group, "Creating default policy row");
        store_call(self.call_timeout, self.store.ensure_policy(group)).await?;
        Ok(GroupPolicy::defaults(group))
    }

    /// Cache a fetched policy unless a write landed while the fetch was in flight
    fn remember(&self, group: GroupId, policy: GroupPolicy, started: Instant) -> GroupPolicy {
        let fresh = CachedPolicy {
            policy: policy.clone(),
            fetched_at: Instant::now(),
            confirmed: true,
        };
        match self.cache.entry(group) {
            Entry::Occupied(entry) if entry.get().fetched_at >= started => {
                entry.get().policy.clone()
            }
            Entry::Occupied(mut entry) => {
                entry.insert(fresh);
                policy
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                policy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::store::MockPersistentStore;
    use crate::moderation::{StoreError, YamlStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(20);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn night_policy(group: GroupId) -> GroupPolicy {
        GroupPolicy {
            night_mode: true,
            ..GroupPolicy::defaults(group)
        }
    }

    /// A mock store that counts loads and can be switched offline
    fn flaky_store(offline: Arc<AtomicBool>, loads: Arc<AtomicUsize>) -> MockPersistentStore {
        let mut store = MockPersistentStore::new();
        store.expect_load_policy().returning(move |group| {
            loads.fetch_add(1, Ordering::SeqCst);
            if offline.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("offline".to_string()))
            } else {
                Ok(Some(night_policy(group)))
            }
        });
        store
    }

    #[test]
    fn test_validate_threshold() {
        assert_eq!(validate_threshold(3), Ok(3));
        assert_eq!(validate_threshold(30), Ok(30));
        assert_eq!(
            validate_threshold(2),
            Err(ConfigurationError::ThresholdOutOfRange(2))
        );
        assert_eq!(
            validate_threshold(31),
            Err(ConfigurationError::ThresholdOutOfRange(31))
        );
    }

    #[test]
    fn test_parse_channel_list() {
        assert_eq!(
            parse_channel_list("10, <#20> 10 30"),
            Ok(vec![ChannelId(10), ChannelId(20), ChannelId(30)])
        );
        assert_eq!(parse_channel_list("  , "), Err(ConfigurationError::NoChannels));
        assert_eq!(
            parse_channel_list("10 general"),
            Err(ConfigurationError::InvalidChannel("general".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_within_ttl_hit_the_cache() {
        let loads = Arc::new(AtomicUsize::new(0));
        let store = flaky_store(Arc::new(AtomicBool::new(false)), loads.clone());
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);
        let group = GroupId(1);

        let first = policies.get(group).await;
        tokio::time::advance(Duration::from_secs(19)).await;
        let second = policies.get(group).await;

        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        policies.get(group).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_served_during_outage() {
        let offline = Arc::new(AtomicBool::new(false));
        let store = flaky_store(offline.clone(), Arc::new(AtomicUsize::new(0)));
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);
        let group = GroupId(1);

        assert!(policies.get(group).await.night_mode);

        offline.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(policies.get(group).await.night_mode);

        // A group never fetched falls back to defaults
        assert_eq!(policies.get(GroupId(2)).await, GroupPolicy::defaults(GroupId(2)));
    }

    #[tokio::test]
    async fn test_set_is_visible_immediately() {
        let store = Arc::new(YamlStore::in_memory());
        let policies = PolicyStore::new(store.clone(), TTL, TIMEOUT);
        let group = GroupId(5);

        policies.get(group).await;
        policies
            .set(group, PolicyUpdate::referral_threshold(5))
            .await;
        let policy = policies.get(group).await;
        assert_eq!(policy.referral_threshold, 5);
        assert!(!policy.night_mode);

        let persisted = store.load_policy(group).await.expect("store is in memory");
        assert_eq!(persisted.map(|p| p.referral_threshold), Some(5));
    }

    #[tokio::test]
    async fn test_set_survives_failed_write() {
        let mut store = MockPersistentStore::new();
        store
            .expect_load_policy()
            .returning(|group| Ok(Some(GroupPolicy::defaults(group))));
        store
            .expect_save_policy()
            .returning(|_| Err(StoreError::Unavailable("offline".to_string())));
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);
        let group = GroupId(3);

        policies
            .set(
                group,
                PolicyUpdate::required_channels(vec![ChannelId(1), ChannelId(2), ChannelId(1)]),
            )
            .await;

        let policy = policies.get(group).await;
        assert_eq!(policy.required_channels, vec![ChannelId(1), ChannelId(2)]);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let policies = PolicyStore::new(Arc::new(YamlStore::in_memory()), TTL, TIMEOUT);
        let group = GroupId(8);

        policies.set(group, PolicyUpdate::night_mode(true)).await;
        policies
            .set(group, PolicyUpdate::required_channels(vec![ChannelId(4)]))
            .await;
        let policy = policies.set(group, PolicyUpdate::default()).await;

        assert!(policy.night_mode);
        assert_eq!(policy.required_channels, vec![ChannelId(4)]);
        assert_eq!(policy.referral_threshold, 0);
    }

    #[tokio::test]
    async fn test_update_during_outage_keeps_stored_fields() {
        let saved = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut store = MockPersistentStore::new();
        store
            .expect_load_policy()
            .returning(|_| Err(StoreError::Unavailable("offline".to_string())));
        let sink = saved.clone();
        store.expect_save_policy().returning(move |policy| {
            sink.lock().unwrap().push(policy);
            Ok(())
        });
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);
        let group = GroupId(6);

        let policy = policies
            .set(group, PolicyUpdate::required_channels(vec![ChannelId(7)]))
            .await;
        assert_eq!(policy.required_channels, vec![ChannelId(7)]);
        policies.set(group, PolicyUpdate::night_mode(true)).await;

        assert!(saved.lock().unwrap().is_empty());
        let policy = policies.get(group).await;
        assert!(policy.night_mode);
        assert_eq!(policy.required_channels, vec![ChannelId(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_merges_onto_last_known_row_during_outage() {
        let offline = Arc::new(AtomicBool::new(false));
        let mut store = flaky_store(offline.clone(), Arc::new(AtomicUsize::new(0)));
        let saved = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = saved.clone();
        store.expect_save_policy().returning(move |policy| {
            sink.lock().unwrap().push(policy);
            Ok(())
        });
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);
        let group = GroupId(1);

        assert!(policies.get(group).await.night_mode);
        offline.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(60)).await;

        policies
            .set(group, PolicyUpdate::required_channels(vec![ChannelId(7)]))
            .await;
        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].night_mode);
        assert_eq!(saved[0].required_channels, vec![ChannelId(7)]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_both_fields() {
        let store = Arc::new(YamlStore::in_memory());
        let policies = PolicyStore::new(store.clone(), TTL, TIMEOUT);
        let group = GroupId(9);

        tokio::join!(
            policies.set(group, PolicyUpdate::night_mode(true)),
            policies.set(group, PolicyUpdate::referral_threshold(4)),
        );

        let persisted = store
            .load_policy(group)
            .await
            .expect("store is in memory")
            .expect("row written");
        assert!(persisted.night_mode);
        assert_eq!(persisted.referral_threshold, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_stamped_at_fetch_start_wins() {
        let policies = PolicyStore::new(Arc::new(YamlStore::in_memory()), TTL, TIMEOUT);
        let group = GroupId(4);

        let started = Instant::now();
        policies.set(group, PolicyUpdate::night_mode(true)).await;
        let kept = policies.remember(group, GroupPolicy::defaults(group), started);

        assert!(kept.night_mode);
        assert!(policies.get(group).await.night_mode);
    }

    #[tokio::test]
    async fn test_missing_row_is_created_with_defaults() {
        let mut store = MockPersistentStore::new();
        store.expect_load_policy().returning(|_| Ok(None));
        store.expect_ensure_policy().times(1).returning(|_| Ok(()));
        let policies = PolicyStore::new(Arc::new(store), TTL, TIMEOUT);

        let policy = policies.get(GroupId(11)).await;
        assert_eq!(policy, GroupPolicy::defaults(GroupId(11)));
    }
}
