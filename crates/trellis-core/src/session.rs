//! Session domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable, token-identified authentication record.
///
/// Identifies an authenticated principal across both the request/response
/// and realtime channels.
///
/// # Invariants
///
/// - `session_token` and `refresh_token` are each globally unique
/// - valid iff `is_active && now < expires_at` (see [`Session::is_valid`])
/// - `last_activity_at` never exceeds the current time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Access credential presented on every request and connect.
    pub session_token: String,
    /// Credential used to extend the session without re-authenticating.
    pub refresh_token: Option<String>,
    /// Cleared on logout; the row is kept, not deleted.
    pub is_active: bool,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last observed activity, updated with a debounce.
    pub last_activity_at: DateTime<Utc>,
    /// Client address at login, if known.
    pub ip_address: Option<String>,
    /// Client user agent at login, if known.
    pub user_agent: Option<String>,
}

impl Session {
    /// Whether this session authenticates requests at `now`.
    ///
    /// Callers holding a cached copy must re-check this locally - a cache
    /// hit never bypasses the expiry rule.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}
