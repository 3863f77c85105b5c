//! Organization membership lookups.
//!
//! The broker scopes every connection to a single organization. When the
//! client does not declare one at connect time, the broker asks this
//! directory for the user's current organization. Deployments back it with
//! their membership tables; tests use the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

/// Resolves a user to their current organization.
#[async_trait]
pub trait OrgDirectory: Clone + Send + Sync + 'static {
    /// The organization the user currently belongs to, if any.
    async fn current_organization(&self, user_id: Uuid) -> Option<Uuid>;
}

/// In-memory directory for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrgDirectory {
    memberships: Arc<Mutex<HashMap<Uuid, Uuid>>>,
}

impl MemoryOrgDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user's current organization.
    pub fn assign(&self, user_id: Uuid, organization_id: Uuid) {
        self.memberships.lock().insert(user_id, organization_id);
    }
}

#[async_trait]
impl OrgDirectory for MemoryOrgDirectory {
    async fn current_organization(&self, user_id: Uuid) -> Option<Uuid> {
        self.memberships.lock().get(&user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_assigned_membership() {
        let directory = MemoryOrgDirectory::new();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        assert_eq!(directory.current_organization(user).await, None);
        directory.assign(user, org);
        assert_eq!(directory.current_organization(user).await, Some(org));
    }
}
