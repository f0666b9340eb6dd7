//! Group membership lookup.
//!
//! Membership and invitations are managed elsewhere; the core only asks whether a user belongs
//! to a group when a Group or Friends tack is created, bid on or listed.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;

use crate::error::MarketplaceResult;
use crate::models::{GroupId, UserId};

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn is_member(&self, user_id: UserId, group_id: GroupId) -> MarketplaceResult<bool>;
}

/// Membership table held in memory
#[derive(Debug, Default)]
pub struct StaticMembership {
    groups: DashMap<GroupId, HashSet<UserId>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, group_id: GroupId, user_id: UserId) {
        self.groups.entry(group_id).or_default().insert(user_id);
    }

    pub fn remove_member(&self, group_id: GroupId, user_id: UserId) -> bool {
        self.groups
            .get_mut(&group_id)
            .map(|mut members| members.remove(&user_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MembershipDirectory for StaticMembership {
    async fn is_member(&self, user_id: UserId, group_id: GroupId) -> MarketplaceResult<bool> {
        Ok(self
            .groups
            .get(&group_id)
            .is_some_and(|members| members.contains(&user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_membership() {
        let directory = StaticMembership::new();
        let group = GroupId::new();
        let user = UserId::new();

        assert!(!directory.is_member(user, group).await.unwrap());
        directory.add_member(group, user);
        assert!(directory.is_member(user, group).await.unwrap());
        assert!(!directory.is_member(user, GroupId::new()).await.unwrap());

        assert!(directory.remove_member(group, user));
        assert!(!directory.is_member(user, group).await.unwrap());
    }
}
