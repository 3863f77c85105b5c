//! Session store abstraction.
//!
//! Trait-based seam to the relational session table. The CRUD layer owns
//! the table itself; this crate only reads and writes through the trait.
//! [`MemorySessionStore`] is the in-process implementation used by tests
//! and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::Session;

/// Input for creating a session at login/registration.
///
/// The caller chooses the duration via `expires_at`; the store assigns the
/// id and stamps `created_at` / `last_activity_at`.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Access credential; must be globally unique.
    pub session_token: String,
    /// Optional refresh credential; must be globally unique when present.
    pub refresh_token: Option<String>,
    /// Hard expiry chosen by the caller.
    pub expires_at: DateTime<Utc>,
    /// Client address, if known.
    pub ip_address: Option<String>,
    /// Client user agent, if known.
    pub user_agent: Option<String>,
}

/// Durable record of issued sessions.
///
/// Must be Clone (shared between the validator and the login layer),
/// Send + Sync, and cheap to clone - implementations share internal state
/// via `Arc`. Time is passed in by the caller so implementations stay
/// clock-free and deterministic under test.
#[async_trait]
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Create a session.
    ///
    /// Fails with [`StoreError::Conflict`] if either token is already in
    /// use by a live row.
    async fn create(&self, input: NewSession, now: DateTime<Utc>) -> Result<Session, StoreError>;

    /// Look up a session by its access token.
    async fn get_by_token(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// Look up a session by its refresh token.
    async fn get_by_refresh_token(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// Record activity on a session. No-op if the session is gone.
    async fn touch_activity(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Extend a session's expiry and reset its activity timestamp.
    ///
    /// Returns the updated session, or `None` if it no longer exists.
    async fn extend(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Mark the session holding this access token inactive.
    ///
    /// The row is kept (audit trail); returns whether a session was found.
    async fn deactivate(&self, token: &str) -> Result<bool, StoreError>;

    /// Delete sessions that are expired or inactive, for one user or
    /// globally.
    ///
    /// The predicate must be evaluated atomically against the store's
    /// current state - never as a read-then-delete in application code -
    /// so a session a concurrent `extend` just renewed is not deleted.
    /// Returns the number of deleted rows.
    async fn reap(&self, user_id: Option<Uuid>, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// In-memory session store.
///
/// Backs tests and the default single-process deployment. All state lives
/// behind one mutex, which is exactly what makes `reap` atomic with respect
/// to concurrent `extend` calls: both mutate under the same guard.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Session id → row.
    sessions: HashMap<Uuid, Session>,
    /// Access token → session id.
    by_token: HashMap<String, Uuid>,
    /// Refresh token → session id.
    by_refresh: HashMap<String, Uuid>,
}

impl MemorySessionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions. Useful in tests.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStoreInner {
    fn remove_indexes(&mut self, session: &Session) {
        self.by_token.remove(&session.session_token);
        if let Some(refresh) = &session.refresh_token {
            self.by_refresh.remove(refresh);
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, input: NewSession, now: DateTime<Utc>) -> Result<Session, StoreError> {
        let mut inner = self.inner.lock();

        if inner.by_token.contains_key(&input.session_token) {
            return Err(StoreError::Conflict("session token already in use".into()));
        }
        if let Some(refresh) = &input.refresh_token {
            if inner.by_refresh.contains_key(refresh) {
                return Err(StoreError::Conflict("refresh token already in use".into()));
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            session_token: input.session_token,
            refresh_token: input.refresh_token,
            is_active: true,
            expires_at: input.expires_at,
            created_at: now,
            last_activity_at: now,
            ip_address: input.ip_address,
            user_agent: input.user_agent,
        };

        inner.by_token.insert(session.session_token.clone(), session.id);
        if let Some(refresh) = &session.refresh_token {
            inner.by_refresh.insert(refresh.clone(), session.id);
        }
        inner.sessions.insert(session.id, session.clone());

        Ok(session)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.by_token.get(token).and_then(|id| inner.sessions.get(id)).cloned())
    }

    async fn get_by_refresh_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.by_refresh.get(token).and_then(|id| inner.sessions.get(id)).cloned())
    }

    async fn touch_activity(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(&id) {
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn extend(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.sessions.get_mut(&id).map(|session| {
            session.expires_at = expires_at;
            session.last_activity_at = now;
            session.clone()
        }))
    }

    async fn deactivate(&self, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(id) = inner.by_token.get(token).copied() else {
            return Ok(false);
        };
        if let Some(session) = inner.sessions.get_mut(&id) {
            session.is_active = false;
            return Ok(true);
        }
        Ok(false)
    }

    async fn reap(&self, user_id: Option<Uuid>, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();

        let doomed: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| !s.is_valid(now))
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .cloned()
            .collect();

        for session in &doomed {
            inner.sessions.remove(&session.id);
            inner.remove_indexes(session);
        }

        Ok(doomed.len() as u64)
    }
}
