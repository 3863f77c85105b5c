//! Short-TTL session cache.
//!
//! Cache-aside layer in front of the session store, keyed by access token.
//! The cache owns its TTL bookkeeping: `get` drops and never returns an
//! entry past the TTL, so callers cannot accidentally read a stale one.
//! Writes are visible to every clone immediately - clones share state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::session::Session;

struct CacheEntry {
    session: Session,
    inserted_at: DateTime<Utc>,
}

/// TTL-bounded session cache keyed by access token.
#[derive(Clone)]
pub struct SessionCache<C: Clock> {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: TimeDelta,
    clock: C,
}

impl<C: Clock> SessionCache<C> {
    /// Create a cache whose entries live at most `ttl`.
    pub fn new(clock: C, ttl: TimeDelta) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), ttl, clock }
    }

    /// Look up a cached session. Expired entries are evicted, not returned.
    ///
    /// A hit only means "recently fetched from the store" - the caller must
    /// still re-check session validity against the current time.
    pub fn get(&self, token: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(token) {
            Some(entry) if now - entry.inserted_at < self.ttl => Some(entry.session.clone()),
            Some(_) => {
                entries.remove(token);
                None
            },
            None => None,
        }
    }

    /// Insert or replace the entry for `token`.
    pub fn insert(&self, token: &str, session: Session) {
        let entry = CacheEntry { session, inserted_at: self.clock.now() };
        self.entries.lock().insert(token.to_owned(), entry);
    }

    /// Evict the entry for `token`, if any.
    pub fn remove(&self, token: &str) {
        self.entries.lock().remove(token);
    }

    /// Number of live entries (expired entries still count until touched).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;

    fn session(token: &str) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_token: token.into(),
            refresh_token: None,
            is_active: true,
            expires_at: now + TimeDelta::hours(1),
            created_at: now,
            last_activity_at: now,
            ip_address: None,
            user_agent: None,
        }
    }

    #[test]
    fn insert_then_get_within_ttl() {
        let clock = ManualClock::default();
        let cache = SessionCache::new(clock.clone(), TimeDelta::minutes(5));

        cache.insert("tok", session("tok"));
        clock.advance(TimeDelta::minutes(4));

        assert!(cache.get("tok").is_some());
    }

    #[test]
    fn entry_expires_at_ttl() {
        let clock = ManualClock::default();
        let cache = SessionCache::new(clock.clone(), TimeDelta::minutes(5));

        cache.insert("tok", session("tok"));
        clock.advance(TimeDelta::minutes(5));

        assert!(cache.get("tok").is_none());
        // And the expired entry is gone, not lingering.
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_evicts() {
        let clock = ManualClock::default();
        let cache = SessionCache::new(clock, TimeDelta::minutes(5));

        cache.insert("tok", session("tok"));
        cache.remove("tok");

        assert!(cache.get("tok").is_none());
    }

    #[test]
    fn clones_share_entries() {
        let clock = ManualClock::default();
        let cache = SessionCache::new(clock, TimeDelta::minutes(5));
        let other = cache.clone();

        cache.insert("tok", session("tok"));
        assert!(other.get("tok").is_some());

        other.remove("tok");
        assert!(cache.get("tok").is_none());
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let clock = ManualClock::default();
        let cache = SessionCache::new(clock, TimeDelta::minutes(5));

        let mut updated = session("tok");
        cache.insert("tok", session("tok"));
        updated.is_active = false;
        cache.insert("tok", updated.clone());

        assert_eq!(cache.get("tok"), Some(updated));
        assert_eq!(cache.len(), 1);
    }
}
