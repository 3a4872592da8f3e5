//! Per-group member contribution counts
//!
//! The store is authoritative. Non-zero counts written through the ledger are
//! mirrored into a process-local map, and when a store call fails the
//! operation is served from that map instead. The map holds at most one entry
//! per persisted contribution row.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use super::error::store_call;
use super::store::{ContributionRow, rank_rows};
use super::{GroupId, PersistentStore, UserId};
use crate::MODERATION_TARGET;

pub struct ContributionLedger {
    store: Arc<dyn PersistentStore>,
    fallback: DashMap<(GroupId, UserId), u64>,
    call_timeout: Duration,
}

impl ContributionLedger {
    #[must_use]
    pub fn new(store: Arc<dyn PersistentStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            fallback: DashMap::new(),
            call_timeout,
        }
    }

    /// Add `delta` and return the new count
    pub async fn increment(&self, group: GroupId, user: UserId, delta: u64) -> u64 {
        match store_call(self.call_timeout, self.store.increment_count(group, user, delta)).await {
            Ok(count) => {
                self.fallback.insert((group, user), count);
                count
            }
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Increment failed, counting locally"
                );
                let mut entry = self.fallback.entry((group, user)).or_insert(0);
                *entry = entry.saturating_add(delta);
                *entry
            }
        }
    }

    pub async fn get(&self, group: GroupId, user: UserId) -> u64 {
        match store_call(self.call_timeout, self.store.count(group, user)).await {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Count lookup failed, using local count"
                );
                self.fallback.get(&(group, user)).map_or(0, |entry| *entry)
            }
        }
    }

    pub async fn set(&self, group: GroupId, user: UserId, count: u64) {
        if count == 0 {
            self.fallback.remove(&(group, user));
        } else {
            self.fallback.insert((group, user), count);
        }
        if let Err(error) =
            store_call(self.call_timeout, self.store.set_count(group, user, count)).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                user_id = %user,
                error = %error,
                "Failed to persist count"
            );
        }
    }

    pub async fn reset(&self, group: GroupId, user: UserId) {
        self.set(group, user, 0).await;
    }

    /// The `n` highest counts in `group`, ties by ascending user id
    pub async fn top(&self, group: GroupId, n: usize) -> Vec<ContributionRow> {
        match store_call(self.call_timeout, self.store.top_counts(group, n)).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    error = %error,
                    "Leaderboard lookup failed, using local counts"
                );
                let mut rows: Vec<ContributionRow> = self
                    .fallback
                    .iter()
                    .filter(|entry| entry.key().0 == group)
                    .map(|entry| ContributionRow {
                        group_id: group,
                        user_id: entry.key().1,
                        count: *entry.value(),
                    })
                    .collect();
                rank_rows(&mut rows, n);
                rows
            }
        }
    }

    pub async fn clear_group(&self, group: GroupId) {
        self.fallback.retain(|(g, _), _| *g != group);
        if let Err(error) = store_call(self.call_timeout, self.store.clear_counts(group)).await {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                error = %error,
                "Failed to clear persisted counts"
            );
        }
    }
}
