//! Bounded cache of each group's linked broadcast channel

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::warn;

use super::error::platform_call;
use super::{ChannelId, ChatPlatform, GroupId};
use crate::MODERATION_TARGET;

#[derive(Debug, Clone, Copy)]
struct Linked {
    channel: Option<ChannelId>,
    fetched_at: Instant,
}

pub struct LinkedChannelCache {
    entries: DashMap<GroupId, Linked>,
    ttl: Duration,
    capacity: usize,
}

impl LinkedChannelCache {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// The linked channel of `group`, looked up on a miss
    ///
    /// A failed lookup serves the expired entry if there is one and is not cached.
    pub async fn resolve(
        &self,
        group: GroupId,
        platform: &dyn ChatPlatform,
        call_timeout: Duration,
    ) -> Option<ChannelId> {
        let cached = self.entries.get(&group).map(|entry| *entry);
        if let Some(linked) = cached {
            if linked.fetched_at.elapsed() < self.ttl {
                return linked.channel;
            }
        }

        match platform_call(call_timeout, platform.linked_channel(group)).await {
            Ok(channel) => {
                self.insert(group, channel);
                channel
            }
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    error = %error,
                    "Linked channel lookup failed"
                );
                cached.and_then(|linked| linked.channel)
            }
        }
    }

    fn insert(&self, group: GroupId, channel: Option<ChannelId>) {
        if !self.entries.contains_key(&group) && self.entries.len() >= self.capacity {
            self.entries
                .retain(|_, linked| linked.fetched_at.elapsed() < self.ttl);
            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|entry| entry.fetched_at)
                    .map(|entry| *entry.key());
                if let Some(oldest) = oldest {
                    self.entries.remove(&oldest);
                }
            }
        }
        self.entries.insert(
            group,
            Linked {
                channel,
                fetched_at: Instant::now(),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::testing::FakePlatform;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_lookup_is_cached_until_ttl() {
        let platform = FakePlatform::default();
        let cache = LinkedChannelCache::new(Duration::from_secs(300), 8);

        assert_eq!(cache.resolve(GroupId(1), &platform, TIMEOUT).await, None);
        platform.link_channel(GroupId(1), ChannelId(50));
        assert_eq!(cache.resolve(GroupId(1), &platform, TIMEOUT).await, None);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(
            cache.resolve(GroupId(1), &platform, TIMEOUT).await,
            Some(ChannelId(50))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_is_bounded() {
        let platform = FakePlatform::default();
        let cache = LinkedChannelCache::new(Duration::from_secs(300), 2);

        for group in 1..=5 {
            cache.resolve(GroupId(group), &platform, TIMEOUT).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(cache.len(), 2);
    }
}
