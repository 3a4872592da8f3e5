//! Direct-message subscribers and owner broadcasts

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{platform_call, store_call};
use super::{ChannelId, ChatPlatform, MessageId, PersistentStore, PlatformResult, UserId};
use crate::MODERATION_TARGET;

/// A user who has talked to the bot in direct messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub display_name: String,
    pub is_bot: bool,
    pub last_seen: DateTime<Utc>,
}

/// What to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastPayload {
    Text(String),
    /// Re-post an existing message
    Copy {
        channel: ChannelId,
        message: MessageId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub id: Uuid,
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Recipients removed because they can no longer be reached
    pub pruned: usize,
}

impl std::fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Delivered {} of {} ({} failed, {} removed as unreachable)",
            self.delivered, self.total, self.failed, self.pruned
        )
    }
}

pub struct SubscriberDirectory {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ChatPlatform>,
    delay: Duration,
    call_timeout: Duration,
}

impl SubscriberDirectory {
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        platform: Arc<dyn ChatPlatform>,
        delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            delay,
            call_timeout,
        }
    }

    /// Record or refresh a subscriber
    pub async fn track(&self, record: SubscriberRecord) {
        let user = record.user_id;
        if let Err(error) = store_call(self.call_timeout, self.store.upsert_subscriber(record)).await {
            warn!(
                target: MODERATION_TARGET,
                user_id = %user,
                error = %error,
                "Failed to record subscriber"
            );
        }
    }

    pub async fn subscribers(&self) -> Vec<UserId> {
        match store_call(self.call_timeout, self.store.subscriber_ids()).await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    error = %error,
                    "Failed to list subscribers"
                );
                Vec::new()
            }
        }
    }

    pub async fn remove(&self, user: UserId) {
        if let Err(error) = store_call(self.call_timeout, self.store.remove_subscriber(user)).await {
            warn!(
                target: MODERATION_TARGET,
                user_id = %user,
                error = %error,
                "Failed to remove subscriber"
            );
        }
    }

    /// Deliver `payload` to every subscriber, one at a time
    ///
    /// Unreachable recipients are removed. Dropping the returned future stops
    /// the run after the current recipient.
    pub async fn broadcast(&self, payload: BroadcastPayload) -> BroadcastReport {
        let recipients = self.subscribers().await;
        let mut report = BroadcastReport {
            id: Uuid::new_v4(),
            total: recipients.len(),
            delivered: 0,
            failed: 0,
            pruned: 0,
        };
        info!(
            target: MODERATION_TARGET,
            broadcast_id = %report.id,
            total = report.total,
            event = "broadcast_start",
            "Broadcast started"
        );

        for user in recipients {
            match self.deliver(user, &payload).await {
                Ok(()) => {
                    report.delivered += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(error) if error.is_unreachable() => {
                    debug!(
                        target: MODERATION_TARGET,
                        broadcast_id = %report.id,
                        user_id = %user,
                        error = %error,
                        "Removing unreachable subscriber"
                    );
                    report.failed += 1;
                    report.pruned += 1;
                    self.remove(user).await;
                }
                Err(error) => {
                    debug!(
                        target: MODERATION_TARGET,
                        broadcast_id = %report.id,
                        user_id = %user,
                        error = %error,
                        "Broadcast delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            target: MODERATION_TARGET,
            broadcast_id = %report.id,
            total = report.total,
            delivered = report.delivered,
            failed = report.failed,
            pruned = report.pruned,
            event = "broadcast_end",
            "Broadcast finished"
        );
        report
    }

    async fn deliver(&self, user: UserId, payload: &BroadcastPayload) -> PlatformResult<()> {
        match payload {
            BroadcastPayload::Text(text) => {
                platform_call(self.call_timeout, self.platform.send_direct(user, text.clone()))
                    .await
            }
            BroadcastPayload::Copy { channel, message } => {
                platform_call(
                    self.call_timeout,
                    self.platform.copy_direct(user, *channel, *message),
                )
                .await
            }
        }
    }
}
