//! Connection registry.
//!
//! The authoritative `user → connection` map for the process. At most one
//! connection is registered per user: inserting a new one returns the
//! superseded handle so the caller can close it. Removal compares handle
//! identity, not just the user id, so a late disconnect from a superseded
//! connection can never evict its replacement.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why the server is closing a connection it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The same user opened a newer connection.
    Superseded,
    /// The broker is shutting down.
    ServerShutdown,
}

/// Items queued to a connection's writer task.
///
/// The queue is bounded; `try_send` either enqueues immediately or fails,
/// so a slow or broken recipient never blocks the sender. Frames queued to
/// one connection are written in queue order.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized JSON frame to deliver.
    Frame(Arc<String>),
    /// Close the transport and end the writer task.
    Close(CloseReason),
}

/// An ephemeral, in-process handle to one live client channel.
///
/// Owned by the registry for its lifetime; never persisted. Clones share
/// the same outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: u64,
    user_id: Uuid,
    organization_id: Uuid,
    sender: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// Create a handle over an outbound queue.
    pub fn new(
        connection_id: u64,
        user_id: Uuid,
        organization_id: Uuid,
        sender: mpsc::Sender<Outbound>,
        connected_at: DateTime<Utc>,
    ) -> Self {
        Self { connection_id, user_id, organization_id, sender, connected_at }
    }

    /// Process-unique id distinguishing this connection from any other for
    /// the same user.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Owning user.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Organization scope resolved at connect time.
    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    /// When the connection was registered.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a frame for delivery.
    ///
    /// Returns whether the frame was accepted. A full or closed queue
    /// counts as a delivery failure for this recipient only.
    pub fn send(&self, frame: Arc<String>) -> bool {
        self.sender.try_send(Outbound::Frame(frame)).is_ok()
    }

    /// Ask the writer task to close the transport.
    ///
    /// Best-effort: if the queue is already gone the connection is already
    /// dying.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.sender.try_send(Outbound::Close(reason));
    }
}

/// Snapshot of live-connection counts for the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Total live connections.
    pub total_connections: usize,
    /// Live connections per organization.
    pub connections_by_organization: HashMap<Uuid, usize>,
}

/// Registry of live connections, keyed by user.
///
/// Plain data structure; the broker serializes access to it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, superseding any previous one for the user.
    ///
    /// Returns the superseded handle so the caller can close it and clean
    /// up its room memberships.
    pub fn insert(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.user_id(), handle)
    }

    /// Remove the user's connection, but only if it is still the one
    /// identified by `connection_id`.
    ///
    /// Returns the removed handle, or `None` if the user has no connection
    /// or a newer connection has taken its place.
    pub fn remove(&mut self, user_id: Uuid, connection_id: u64) -> Option<ConnectionHandle> {
        match self.connections.get(&user_id) {
            Some(current) if current.connection_id() == connection_id => {
                self.connections.remove(&user_id)
            },
            _ => None,
        }
    }

    /// The user's live connection, if any.
    pub fn get(&self, user_id: Uuid) -> Option<&ConnectionHandle> {
        self.connections.get(&user_id)
    }

    /// All live connections scoped to an organization.
    pub fn in_organization(&self, organization_id: Uuid) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values().filter(move |c| c.organization_id() == organization_id)
    }

    /// Drain every connection, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.connections.drain().map(|(_, handle)| handle).collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Count snapshot for the admin surface.
    pub fn stats(&self) -> ConnectionStats {
        let mut by_organization: HashMap<Uuid, usize> = HashMap::new();
        for handle in self.connections.values() {
            *by_organization.entry(handle.organization_id()).or_default() += 1;
        }
        ConnectionStats {
            total_connections: self.connections.len(),
            connections_by_organization: by_organization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(connection_id: u64, user_id: Uuid, org: Uuid) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionHandle::new(connection_id, user_id, org, tx, Utc::now())
    }

    #[test]
    fn insert_and_get() {
        let mut registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        assert!(registry.insert(handle(1, user, org)).is_none());
        assert_eq!(registry.get(user).map(ConnectionHandle::connection_id), Some(1));
        assert!(registry.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn insert_supersedes_previous_connection() {
        let mut registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        registry.insert(handle(1, user, org));
        let superseded = registry.insert(handle(2, user, org));

        assert_eq!(superseded.map(|h| h.connection_id()), Some(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(user).map(ConnectionHandle::connection_id), Some(2));
    }

    #[test]
    fn remove_requires_matching_connection_id() {
        let mut registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        registry.insert(handle(1, user, org));
        registry.insert(handle(2, user, org));

        // The superseded connection's late disconnect must not evict the
        // replacement.
        assert!(registry.remove(user, 1).is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove(user, 2).map(|h| h.connection_id()), Some(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_unknown_user_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.remove(Uuid::new_v4(), 1).is_none());
    }

    #[test]
    fn stats_count_per_organization() {
        let mut registry = ConnectionRegistry::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        registry.insert(handle(1, Uuid::new_v4(), org_a));
        registry.insert(handle(2, Uuid::new_v4(), org_a));
        registry.insert(handle(3, Uuid::new_v4(), org_b));

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.connections_by_organization.get(&org_a), Some(&2));
        assert_eq!(stats.connections_by_organization.get(&org_b), Some(&1));
    }

    #[test]
    fn in_organization_filters() {
        let mut registry = ConnectionRegistry::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        registry.insert(handle(1, Uuid::new_v4(), org_a));
        registry.insert(handle(2, Uuid::new_v4(), org_b));

        assert_eq!(registry.in_organization(org_a).count(), 1);
    }

    #[test]
    fn drain_empties_the_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(handle(1, Uuid::new_v4(), Uuid::new_v4()));
        registry.insert(handle(2, Uuid::new_v4(), Uuid::new_v4()));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn send_fails_when_queue_is_full_or_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let h = ConnectionHandle::new(1, Uuid::new_v4(), Uuid::new_v4(), tx, Utc::now());

        assert!(h.send(Arc::new("one".into())));
        // Queue full: failure is local to this recipient.
        assert!(!h.send(Arc::new("two".into())));

        rx.close();
        assert!(!h.send(Arc::new("three".into())));
    }
}
