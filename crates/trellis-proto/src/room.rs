//! Room identifiers.
//!
//! A room is a named multicast group of currently-connected users. Two kinds
//! exist: the per-user notification room every connection joins on connect,
//! and per-project collaboration rooms joined explicitly.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a multicast room.
///
/// Renders as `notif:{userId}:{organizationId}` or `project:{projectId}`,
/// matching the identifiers the REST layer uses when triggering broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomId {
    /// Per-user notification room, scoped to one organization.
    Notification {
        /// Room owner.
        user_id: Uuid,
        /// Organization scope.
        organization_id: Uuid,
    },

    /// Per-project collaboration room.
    Project {
        /// The project all members collaborate on.
        project_id: Uuid,
    },
}

impl RoomId {
    /// Notification room for a user within an organization.
    pub fn notification(user_id: Uuid, organization_id: Uuid) -> Self {
        Self::Notification { user_id, organization_id }
    }

    /// Collaboration room for a project.
    pub fn project(project_id: Uuid) -> Self {
        Self::Project { project_id }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notification { user_id, organization_id } => {
                write!(f, "notif:{user_id}:{organization_id}")
            },
            Self::Project { project_id } => write!(f, "project:{project_id}"),
        }
    }
}
