//! Per-group bypass grants for the referral gate

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{info, warn};

use super::error::store_call;
use super::{GroupId, PersistentStore, UserId};
use crate::MODERATION_TARGET;

/// Grants are written to a local set first, then persisted
pub struct PrivilegeRegistry {
    store: Arc<dyn PersistentStore>,
    granted: DashSet<(GroupId, UserId)>,
    call_timeout: Duration,
}

impl PrivilegeRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn PersistentStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            granted: DashSet::new(),
            call_timeout,
        }
    }

    pub async fn grant(&self, group: GroupId, user: UserId) {
        self.granted.insert((group, user));
        if let Err(error) =
            store_call(self.call_timeout, self.store.insert_privilege(group, user)).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                user_id = %user,
                error = %error,
                "Failed to persist privilege grant"
            );
        }
        info!(
            target: MODERATION_TARGET,
            group_id = %group,
            user_id = %user,
            event = "privilege_granted",
            "Privilege granted"
        );
    }

    pub async fn has(&self, group: GroupId, user: UserId) -> bool {
        if self.granted.contains(&(group, user)) {
            return true;
        }
        match store_call(self.call_timeout, self.store.has_privilege(group, user)).await {
            Ok(true) => {
                self.granted.insert((group, user));
                true
            }
            Ok(false) => false,
            Err(error) => {
                warn!(
                    target: MODERATION_TARGET,
                    group_id = %group,
                    user_id = %user,
                    error = %error,
                    "Privilege lookup failed"
                );
                false
            }
        }
    }

    /// Drop every grant in `group`, persisted and cached
    pub async fn revoke_all(&self, group: GroupId) {
        self.granted.retain(|(g, _)| *g != group);
        if let Err(error) = store_call(self.call_timeout, self.store.clear_privileges(group)).await
        {
            warn!(
                target: MODERATION_TARGET,
                group_id = %group,
                error = %error,
                "Failed to clear persisted privileges"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::store::MockPersistentStore;
    use crate::moderation::{StoreError, YamlStore};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let store = Arc::new(YamlStore::in_memory());
        let registry = PrivilegeRegistry::new(store.clone(), TIMEOUT);

        registry.grant(GroupId(1), UserId(2)).await;
        registry.grant(GroupId(1), UserId(2)).await;
        registry.grant(GroupId(9), UserId(2)).await;
        assert!(registry.has(GroupId(1), UserId(2)).await);
        assert!(!registry.has(GroupId(1), UserId(3)).await);

        registry.revoke_all(GroupId(1)).await;
        assert!(!registry.has(GroupId(1), UserId(2)).await);
        assert!(registry.has(GroupId(9), UserId(2)).await);
    }

    #[tokio::test]
    async fn test_persisted_grant_is_found() {
        let store = Arc::new(YamlStore::in_memory());
        store
            .insert_privilege(GroupId(1), UserId(4))
            .await
            .expect("in memory");
        let registry = PrivilegeRegistry::new(store, TIMEOUT);
        assert!(registry.has(GroupId(1), UserId(4)).await);
    }

    #[tokio::test]
    async fn test_grant_visible_while_store_is_down() {
        let mut store = MockPersistentStore::new();
        store
            .expect_insert_privilege()
            .returning(|_, _| Err(StoreError::Timeout));
        store
            .expect_has_privilege()
            .returning(|_, _| Err(StoreError::Timeout));
        let registry = PrivilegeRegistry::new(Arc::new(store), TIMEOUT);

        registry.grant(GroupId(1), UserId(2)).await;
        assert!(registry.has(GroupId(1), UserId(2)).await);
        assert!(!registry.has(GroupId(1), UserId(3)).await);
    }
}
