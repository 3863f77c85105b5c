//! Cache-aside session validation.
//!
//! Turns a bearer token into a user identity with low latency while staying
//! consistent with the session store:
//!
//! - cache hits are locally re-checked against expiry/active - a hit never
//!   bypasses the validity rule
//! - store lookups are timeout-bounded and fail closed: if the store cannot
//!   answer, the token is treated as invalid rather than trusting a
//!   cache-only result past its TTL
//! - logout evicts the cache entry synchronously, before returning, so no
//!   later `validate` can observe a stale "active" session

use std::future::Future;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::warn;
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::error::StoreError;
use crate::session::Session;
use crate::store::SessionStore;

/// Validation tunables.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// How long a cached session may be served without re-reading the
    /// store. Bounded at five minutes by the design.
    pub cache_ttl: TimeDelta,
    /// Minimum interval between `last_activity_at` writes for one session.
    pub activity_debounce: TimeDelta,
    /// How far `refresh` pushes out `expires_at`.
    pub refresh_extension: TimeDelta,
    /// Upper bound on any single store round-trip.
    pub store_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: TimeDelta::minutes(5),
            activity_debounce: TimeDelta::minutes(5),
            refresh_extension: TimeDelta::days(7),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of resolving a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The token maps to a currently valid session.
    Valid(Session),
    /// Unknown, expired, inactive, or the store could not be consulted.
    Invalid,
}

impl Validation {
    /// The session, if valid.
    #[must_use]
    pub fn session(self) -> Option<Session> {
        match self {
            Self::Valid(session) => Some(session),
            Self::Invalid => None,
        }
    }
}

/// Resolves bearer tokens to sessions through the cache-aside layer.
///
/// Shared by the HTTP middleware and the realtime connect path; clones
/// share the cache, so an eviction in one is visible to all.
#[derive(Clone)]
pub struct SessionValidator<S, C>
where
    S: SessionStore,
    C: Clock,
{
    store: S,
    cache: SessionCache<C>,
    clock: C,
    config: ValidatorConfig,
}

impl<S, C> SessionValidator<S, C>
where
    S: SessionStore,
    C: Clock,
{
    /// Create a validator over `store`, with its own cache.
    pub fn new(store: S, clock: C, config: ValidatorConfig) -> Self {
        let cache = SessionCache::new(clock.clone(), config.cache_ttl);
        Self { store, cache, clock, config }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run a store call under the configured timeout.
    ///
    /// `None` means the store could not give an answer (error or timeout);
    /// callers on the authentication path must fail closed on it.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "session store call failed");
                None
            },
            Err(_) => {
                warn!(operation, timeout = ?self.config.store_timeout, "session store call timed out");
                None
            },
        }
    }

    /// Resolve an access token to a session.
    ///
    /// Cache-aside: hits are re-checked locally against expiry and the
    /// active flag; misses and stale hits fall back to the store, and the
    /// cache is populated only with sessions that are valid right now.
    pub async fn validate(&self, token: &str) -> Validation {
        let now = self.clock.now();

        if let Some(cached) = self.cache.get(token) {
            if cached.is_valid(now) {
                return Validation::Valid(cached);
            }
            // Cached but no longer valid: evict and fall through to the
            // store - the row may have been renewed elsewhere.
            self.cache.remove(token);
        }

        match self.bounded("get_by_token", self.store.get_by_token(token)).await {
            Some(Some(session)) if session.is_valid(now) => {
                self.cache.insert(token, session.clone());
                Validation::Valid(session)
            },
            Some(_) => {
                self.cache.remove(token);
                Validation::Invalid
            },
            // Store unavailable: fail closed.
            None => Validation::Invalid,
        }
    }

    /// Record activity on a session, debounced.
    ///
    /// Skips the write entirely if less than the debounce interval has
    /// passed since `last_activity_at`, bounding write amplification under
    /// high read traffic. Returns whether a write happened.
    pub async fn touch_activity(&self, session: &Session) -> bool {
        let now = self.clock.now();
        if now - session.last_activity_at <= self.config.activity_debounce {
            return false;
        }

        if self
            .bounded("touch_activity", self.store.touch_activity(session.id, now))
            .await
            .is_none()
        {
            // Activity tracking is best-effort; the session stays usable.
            return false;
        }

        let mut updated = session.clone();
        updated.last_activity_at = now;
        let token = updated.session_token.clone();
        self.cache.insert(&token, updated);
        true
    }

    /// Extend a session by presenting its refresh token.
    ///
    /// On success the entry cached under the access token is evicted - the
    /// next `validate` repopulates it from the renewed row.
    pub async fn refresh(&self, refresh_token: &str) -> Validation {
        let now = self.clock.now();

        let found = match self
            .bounded("get_by_refresh_token", self.store.get_by_refresh_token(refresh_token))
            .await
        {
            Some(found) => found,
            None => return Validation::Invalid,
        };

        let Some(session) = found else {
            return Validation::Invalid;
        };

        if !session.is_valid(now) {
            self.cache.remove(&session.session_token);
            return Validation::Invalid;
        }

        let expires_at = now + self.config.refresh_extension;
        match self.bounded("extend", self.store.extend(session.id, expires_at, now)).await {
            Some(Some(renewed)) => {
                self.cache.remove(&session.session_token);
                Validation::Valid(renewed)
            },
            _ => Validation::Invalid,
        }
    }

    /// Deactivate the session holding this token and evict its cache
    /// entry.
    ///
    /// The eviction happens before this returns in every path, including
    /// store failure, so a subsequent `validate` can never serve the stale
    /// "active" copy.
    pub async fn logout(&self, token: &str) -> Result<bool, StoreError> {
        let result = match tokio::time::timeout(
            self.config.store_timeout,
            self.store.deactivate(token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable("deactivate timed out".into())),
        };

        self.cache.remove(token);
        result
    }

    /// Delete expired or inactive sessions, for one user or globally.
    pub async fn reap(&self, user_id: Option<Uuid>) -> Result<u64, StoreError> {
        let now = self.clock.now();
        match tokio::time::timeout(self.config.store_timeout, self.store.reap(user_id, now)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable("reap timed out".into())),
        }
    }
}
