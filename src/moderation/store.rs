//! The persistent store behind the moderation core
//!
//! Every component keeps working when a call fails: the caller logs the
//! error and serves from its in-memory state. See [`YamlStore`](super::YamlStore)
//! for the file-backed implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GroupId, GroupPolicy, RestrictionRecord, StoreResult, SubscriberRecord, UserId};

/// One row of the contribution table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRow {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub count: u64,
}

/// One row of the privilege table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeRow {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub granted_at: DateTime<Utc>,
}

/// Storage operations, one group of methods per table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load_policy(&self, group: GroupId) -> StoreResult<Option<GroupPolicy>>;
    /// Insert the default row for `group` unless one exists
    async fn ensure_policy(&self, group: GroupId) -> StoreResult<()>;
    async fn save_policy(&self, policy: GroupPolicy) -> StoreResult<()>;

    /// Add `delta` to the count and return the new value
    async fn increment_count(&self, group: GroupId, user: UserId, delta: u64) -> StoreResult<u64>;
    async fn count(&self, group: GroupId, user: UserId) -> StoreResult<u64>;
    async fn set_count(&self, group: GroupId, user: UserId, count: u64) -> StoreResult<()>;
    /// Highest counts first, ties broken by ascending user id
    async fn top_counts(&self, group: GroupId, limit: usize) -> StoreResult<Vec<ContributionRow>>;
    async fn clear_counts(&self, group: GroupId) -> StoreResult<()>;

    async fn has_privilege(&self, group: GroupId, user: UserId) -> StoreResult<bool>;
    async fn insert_privilege(&self, group: GroupId, user: UserId) -> StoreResult<()>;
    async fn clear_privileges(&self, group: GroupId) -> StoreResult<()>;

    async fn restriction_until(
        &self,
        group: GroupId,
        user: UserId,
    ) -> StoreResult<Option<DateTime<Utc>>>;
    async fn upsert_restriction(&self, record: RestrictionRecord) -> StoreResult<()>;
    async fn delete_restriction(&self, group: GroupId, user: UserId) -> StoreResult<()>;

    async fn upsert_subscriber(&self, record: SubscriberRecord) -> StoreResult<()>;
    async fn subscriber_ids(&self) -> StoreResult<Vec<UserId>>;
    async fn remove_subscriber(&self, user: UserId) -> StoreResult<()>;
}

/// Order rows for a leaderboard
pub(crate) fn rank_rows(rows: &mut Vec<ContributionRow>, limit: usize) {
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.user_id.cmp(&b.user_id)));
    rows.truncate(limit);
}
