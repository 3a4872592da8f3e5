//! File-backed [`PersistentStore`]
//!
//! Tables live in `DashMap`s and are written back to one YAML file per table
//! after every mutation. A file is written to a temporary sibling first and
//! then renamed over the old one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::info;

use super::store::{ContributionRow, PrivilegeRow, rank_rows};
use super::{
    GroupId, GroupPolicy, PersistentStore, RestrictionRecord, StoreResult, SubscriberRecord,
    UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Policies,
    Contributions,
    Privileges,
    Restrictions,
    Subscribers,
}

impl Table {
    const fn file_name(self) -> &'static str {
        match self {
            Self::Policies => "group_policies.yaml",
            Self::Contributions => "contributions.yaml",
            Self::Privileges => "privileges.yaml",
            Self::Restrictions => "restrictions.yaml",
            Self::Subscribers => "subscribers.yaml",
        }
    }
}

type MemberKey = (GroupId, UserId);

/// YAML-file store; `in_memory` skips the files entirely
pub struct YamlStore {
    data_dir: Option<PathBuf>,
    policies: DashMap<GroupId, GroupPolicy>,
    counts: DashMap<MemberKey, u64>,
    privileges: DashMap<MemberKey, DateTime<Utc>>,
    restrictions: DashMap<MemberKey, DateTime<Utc>>,
    subscribers: DashMap<UserId, SubscriberRecord>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for YamlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamlStore")
            .field("data_dir", &self.data_dir)
            .field("policies", &self.policies.len())
            .field("counts", &self.counts.len())
            .field("privileges", &self.privileges.len())
            .field("restrictions", &self.restrictions.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl YamlStore {
    fn empty(data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            policies: DashMap::new(),
            counts: DashMap::new(),
            privileges: DashMap::new(),
            restrictions: DashMap::new(),
            subscribers: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// A store that keeps everything in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self::empty(None)
    }

    /// Load every table from `data_dir`, creating the directory if needed
    ///
    /// Missing files are treated as empty tables.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or a file cannot
    /// be read or parsed
    pub async fn load(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = data_dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let store = Self::empty(Some(dir.clone()));
        for policy in read_table::<GroupPolicy>(&dir, Table::Policies).await? {
            store.policies.insert(policy.group_id, policy);
        }
        for row in read_table::<ContributionRow>(&dir, Table::Contributions).await? {
            store.counts.insert((row.group_id, row.user_id), row.count);
        }
        for row in read_table::<PrivilegeRow>(&dir, Table::Privileges).await? {
            store
                .privileges
                .insert((row.group_id, row.user_id), row.granted_at);
        }
        for record in read_table::<RestrictionRecord>(&dir, Table::Restrictions).await? {
            store
                .restrictions
                .insert((record.group_id, record.user_id), record.until);
        }
        for record in read_table::<SubscriberRecord>(&dir, Table::Subscribers).await? {
            store.subscribers.insert(record.user_id, record);
        }

        info!(
            data_dir = %dir.display(),
            groups = store.policies.len(),
            subscribers = store.subscribers.len(),
            "Loaded moderation store"
        );
        Ok(store)
    }

    /// Write `table` back to its file
    async fn flush(&self, table: Table) -> StoreResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;

        let yaml = match table {
            Table::Policies => {
                let mut rows: Vec<GroupPolicy> =
                    self.policies.iter().map(|e| e.value().clone()).collect();
                rows.sort_by_key(|p| p.group_id);
                to_yaml(&rows)?
            }
            Table::Contributions => {
                let mut rows: Vec<ContributionRow> = self
                    .counts
                    .iter()
                    .map(|e| ContributionRow {
                        group_id: e.key().0,
                        user_id: e.key().1,
                        count: *e.value(),
                    })
                    .collect();
                rows.sort_by_key(|r| (r.group_id, r.user_id));
                to_yaml(&rows)?
            }
            Table::Privileges => {
                let mut rows: Vec<PrivilegeRow> = self
                    .privileges
                    .iter()
                    .map(|e| PrivilegeRow {
                        group_id: e.key().0,
                        user_id: e.key().1,
                        granted_at: *e.value(),
                    })
                    .collect();
                rows.sort_by_key(|r| (r.group_id, r.user_id));
                to_yaml(&rows)?
            }
            Table::Restrictions => {
                let mut rows: Vec<RestrictionRecord> = self
                    .restrictions
                    .iter()
                    .map(|e| RestrictionRecord {
                        group_id: e.key().0,
                        user_id: e.key().1,
                        until: *e.value(),
                    })
                    .collect();
                rows.sort_by_key(|r| (r.group_id, r.user_id));
                to_yaml(&rows)?
            }
            Table::Subscribers => {
                let mut rows: Vec<SubscriberRecord> =
                    self.subscribers.iter().map(|e| e.value().clone()).collect();
                rows.sort_by_key(|r| r.user_id);
                to_yaml(&rows)?
            }
        };

        let path = dir.join(table.file_name());
        let staging = path.with_extension("yaml.tmp");
        tokio::fs::write(&staging, yaml).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

async fn read_table<T: DeserializeOwned>(dir: &Path, table: Table) -> StoreResult<Vec<T>> {
    match tokio::fs::read_to_string(dir.join(table.file_name())).await {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => Ok(serde_yaml::from_str(&content)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

fn to_yaml<T: Serialize>(rows: &T) -> StoreResult<String> {
    Ok(serde_yaml::to_string(rows)?)
}

#[async_trait]
impl PersistentStore for YamlStore {
    async fn load_policy(&self, group: GroupId) -> StoreResult<Option<GroupPolicy>> {
        Ok(self.policies.get(&group).map(|entry| entry.value().clone()))
    }

    async fn ensure_policy(&self, group: GroupId) -> StoreResult<()> {
        if self.policies.contains_key(&group) {
            return Ok(());
        }
        self.policies
            .entry(group)
            .or_insert_with(|| GroupPolicy::defaults(group));
        self.flush(Table::Policies).await
    }

    async fn save_policy(&self, policy: GroupPolicy) -> StoreResult<()> {
        self.policies.insert(policy.group_id, policy);
        self.flush(Table::Policies).await
    }

    async fn increment_count(&self, group: GroupId, user: UserId, delta: u64) -> StoreResult<u64> {
        let count = {
            let mut entry = self.counts.entry((group, user)).or_insert(0);
            *entry = entry.saturating_add(delta);
            *entry
        };
        self.flush(Table::Contributions).await?;
        Ok(count)
    }

    async fn count(&self, group: GroupId, user: UserId) -> StoreResult<u64> {
        Ok(self.counts.get(&(group, user)).map_or(0, |entry| *entry))
    }

    async fn set_count(&self, group: GroupId, user: UserId, count: u64) -> StoreResult<()> {
        self.counts.insert((group, user), count);
        self.flush(Table::Contributions).await
    }

    async fn top_counts(&self, group: GroupId, limit: usize) -> StoreResult<Vec<ContributionRow>> {
        let mut rows: Vec<ContributionRow> = self
            .counts
            .iter()
            .filter(|entry| entry.key().0 == group)
            .map(|entry| ContributionRow {
                group_id: group,
                user_id: entry.key().1,
                count: *entry.value(),
            })
            .collect();
        rank_rows(&mut rows, limit);
        Ok(rows)
    }

    async fn clear_counts(&self, group: GroupId) -> StoreResult<()> {
        self.counts.retain(|(g, _), _| *g != group);
        self.flush(Table::Contributions).await
    }

    async fn has_privilege(&self, group: GroupId, user: UserId) -> StoreResult<bool> {
        Ok(self.privileges.contains_key(&(group, user)))
    }

    async fn insert_privilege(&self, group: GroupId, user: UserId) -> StoreResult<()> {
        self.privileges.entry((group, user)).or_insert_with(Utc::now);
        self.flush(Table::Privileges).await
    }

    async fn clear_privileges(&self, group: GroupId) -> StoreResult<()> {
        self.privileges.retain(|(g, _), _| *g != group);
        self.flush(Table::Privileges).await
    }

    async fn restriction_until(
        &self,
        group: GroupId,
        user: UserId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.restrictions.get(&(group, user)).map(|entry| *entry))
    }

    async fn upsert_restriction(&self, record: RestrictionRecord) -> StoreResult<()> {
        self.restrictions
            .insert((record.group_id, record.user_id), record.until);
        self.flush(Table::Restrictions).await
    }

    async fn delete_restriction(&self, group: GroupId, user: UserId) -> StoreResult<()> {
        if self.restrictions.remove(&(group, user)).is_none() {
            return Ok(());
        }
        self.flush(Table::Restrictions).await
    }

    async fn upsert_subscriber(&self, record: SubscriberRecord) -> StoreResult<()> {
        self.subscribers.insert(record.user_id, record);
        self.flush(Table::Subscribers).await
    }

    async fn subscriber_ids(&self) -> StoreResult<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.subscribers.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn remove_subscriber(&self, user: UserId) -> StoreResult<()> {
        if self.subscribers.remove(&user).is_none() {
            return Ok(());
        }
        self.flush(Table::Subscribers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ChannelId;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guild-warden-store-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_tables_survive_reload() {
        let dir = scratch_dir();
        let group = GroupId(100);
        let until = Utc::now() + chrono::Duration::seconds(60);
        {
            let store = YamlStore::load(&dir).await.expect("Failed to open store");
            store
                .save_policy(GroupPolicy {
                    required_channels: vec![ChannelId(5)],
                    referral_threshold: 4,
                    ..GroupPolicy::defaults(group)
                })
                .await
                .expect("Failed to save policy");
            store
                .increment_count(group, UserId(1), 2)
                .await
                .expect("Failed to increment");
            store
                .insert_privilege(group, UserId(2))
                .await
                .expect("Failed to grant");
            store
                .upsert_restriction(RestrictionRecord {
                    group_id: group,
                    user_id: UserId(3),
                    until,
                })
                .await
                .expect("Failed to restrict");
        }

        let reloaded = YamlStore::load(&dir).await.expect("Failed to reload store");
        let policy = reloaded
            .load_policy(group)
            .await
            .expect("in memory")
            .expect("policy persisted");
        assert_eq!(policy.required_channels, vec![ChannelId(5)]);
        assert_eq!(policy.referral_threshold, 4);
        assert_eq!(reloaded.count(group, UserId(1)).await.ok(), Some(2));
        assert_eq!(reloaded.has_privilege(group, UserId(2)).await.ok(), Some(true));
        assert_eq!(
            reloaded.restriction_until(group, UserId(3)).await.ok(),
            Some(Some(until))
        );

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_ensure_policy_keeps_existing_row() {
        let store = YamlStore::in_memory();
        let group = GroupId(1);
        store
            .save_policy(GroupPolicy {
                night_mode: true,
                ..GroupPolicy::defaults(group)
            })
            .await
            .expect("in memory");
        store.ensure_policy(group).await.expect("in memory");

        let policy = store.load_policy(group).await.expect("in memory");
        assert!(policy.is_some_and(|p| p.night_mode));
    }

    #[tokio::test]
    async fn test_group_scoped_clears() {
        let store = YamlStore::in_memory();
        for (group, user) in [(1, 1), (1, 2), (2, 1)] {
            store
                .increment_count(GroupId(group), UserId(user), 1)
                .await
                .expect("in memory");
            store
                .insert_privilege(GroupId(group), UserId(user))
                .await
                .expect("in memory");
        }

        store.clear_counts(GroupId(1)).await.expect("in memory");
        store.clear_privileges(GroupId(1)).await.expect("in memory");

        assert_eq!(store.count(GroupId(1), UserId(1)).await.ok(), Some(0));
        assert_eq!(store.count(GroupId(2), UserId(1)).await.ok(), Some(1));
        assert_eq!(
            store.has_privilege(GroupId(1), UserId(2)).await.ok(),
            Some(false)
        );
        assert_eq!(
            store.has_privilege(GroupId(2), UserId(1)).await.ok(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = scratch_dir();
        tokio::fs::create_dir_all(&dir).await.expect("Failed to create dir");
        tokio::fs::write(dir.join("contributions.yaml"), "{ not: [valid")
            .await
            .expect("Failed to write file");

        let result = YamlStore::load(&dir).await;
        assert!(matches!(result, Err(crate::moderation::StoreError::Serialization(_))));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
