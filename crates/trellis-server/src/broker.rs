//! Connection broker.
//!
//! Owns the registry and room index behind a single lock and implements
//! every operation the transport and the REST-facing surface need: connect,
//! disconnect, room membership, and fan-out. Frames are serialized once per
//! broadcast and shared across recipients; actual sends happen after the
//! lock is released, through each connection's bounded queue, so one slow
//! recipient can neither stall the broker nor other recipients.
//!
//! # Invariants
//!
//! - `connection_established` is queued while the registry lock is still
//!   held, so it is always the first frame a new connection receives.
//! - Only connected users hold room memberships; disconnect removes all of
//!   them atomically with the registry entry.
//! - A superseded connection is closed by the broker, and its late
//!   disconnect cannot evict its replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use trellis_core::{Clock, SessionStore, SessionValidator, Validation};
use trellis_proto::{ClientMessage, ProtocolError, RoomId, ServerMessage, parse_client_frame};
use uuid::Uuid;

use crate::directory::OrgDirectory;
use crate::registry::{
    CloseReason, ConnectionHandle, ConnectionRegistry, ConnectionStats, Outbound,
};
use crate::rooms::RoomIndex;

/// Broker tunables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum simultaneous connections; connects beyond it are refused.
    pub max_connections: usize,
    /// Outbound queue depth per connection.
    pub outbound_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, outbound_capacity: 64 }
    }
}

/// Why a connect attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The token is invalid, or it belongs to a different user.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The server is at its connection limit.
    #[error("connection limit reached")]
    AtCapacity,

    /// No organization scope could be resolved for the user.
    #[error("no organization membership for user")]
    OrganizationUnresolved,
}

/// Parameters a client presents when connecting.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Bearer token to validate.
    pub token: String,
    /// User the client claims to be; must match the session.
    pub user_id: Uuid,
    /// Organization scope, if the client declares one.
    pub organization_id: Option<Uuid>,
}

/// Registry and room index, guarded together.
///
/// One lock for both keeps connect/disconnect atomic across them; all
/// operations under it are short map manipulations.
#[derive(Default)]
struct BrokerState {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
}

/// The connection broker.
///
/// Cheap to clone; clones share all state.
pub struct Broker<S, C, D>
where
    S: SessionStore,
    C: Clock,
    D: OrgDirectory,
{
    validator: SessionValidator<S, C>,
    directory: D,
    clock: C,
    state: Arc<Mutex<BrokerState>>,
    next_connection_id: Arc<AtomicU64>,
    config: BrokerConfig,
}

impl<S, C, D> Clone for Broker<S, C, D>
where
    S: SessionStore,
    C: Clock,
    D: OrgDirectory,
{
    fn clone(&self) -> Self {
        Self {
            validator: self.validator.clone(),
            directory: self.directory.clone(),
            clock: self.clock.clone(),
            state: Arc::clone(&self.state),
            next_connection_id: Arc::clone(&self.next_connection_id),
            config: self.config.clone(),
        }
    }
}

impl<S, C, D> Broker<S, C, D>
where
    S: SessionStore,
    C: Clock,
    D: OrgDirectory,
{
    /// Create a broker over a validator and an organization directory.
    ///
    /// `outbound_capacity` is clamped to at least 1; a connection always
    /// has room for its `connection_established` acknowledgment.
    pub fn new(
        validator: SessionValidator<S, C>,
        directory: D,
        clock: C,
        mut config: BrokerConfig,
    ) -> Self {
        config.outbound_capacity = config.outbound_capacity.max(1);
        Self {
            validator,
            directory,
            clock,
            state: Arc::new(Mutex::new(BrokerState::default())),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    /// The session validator, shared with the rest of the process.
    pub fn validator(&self) -> &SessionValidator<S, C> {
        &self.validator
    }

    /// Authenticate and register a connection.
    ///
    /// On success returns the handle (already registered, already a member
    /// of its notification room) and the receiving end of its outbound
    /// queue; the `connection_established` acknowledgment is the first item
    /// in that queue. A previous connection for the same user is superseded
    /// and closed.
    pub async fn connect(
        &self,
        params: ConnectParams,
    ) -> Result<(ConnectionHandle, mpsc::Receiver<Outbound>), ConnectError> {
        let session = match self.validator.validate(&params.token).await {
            Validation::Valid(session) => session,
            Validation::Invalid => return Err(ConnectError::AuthenticationFailed),
        };
        if session.user_id != params.user_id {
            warn!(user_id = %params.user_id, "token does not belong to the claimed user");
            return Err(ConnectError::AuthenticationFailed);
        }

        // Best-effort; a skipped or failed write never blocks the connect.
        self.validator.touch_activity(&session).await;

        let organization_id = match params.organization_id {
            Some(org) => org,
            None => self
                .directory
                .current_organization(params.user_id)
                .await
                .ok_or(ConnectError::OrganizationUnresolved)?,
        };

        let now = self.clock.now();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        let handle =
            ConnectionHandle::new(connection_id, params.user_id, organization_id, tx, now);

        // A connection that cannot be acknowledged is refused outright;
        // registering it would break the ack-first guarantee.
        let ack = encode(&ServerMessage::connection_established(
            params.user_id,
            organization_id,
            now,
        ))
        .ok_or(ConnectError::AuthenticationFailed)?;

        let superseded = {
            let mut state = self.state.lock();

            let replacing = state.registry.get(params.user_id).is_some();
            if !replacing && state.registry.len() >= self.config.max_connections {
                return Err(ConnectError::AtCapacity);
            }

            let superseded = state.registry.insert(handle.clone());
            // Memberships of the superseded connection do not carry over.
            state.rooms.remove_user(params.user_id);
            state.rooms.join(RoomId::notification(params.user_id, organization_id), params.user_id);

            // Queued under the lock: nothing can reach this connection's
            // queue before the acknowledgment.
            handle.send(ack);

            superseded
        };

        if let Some(old) = superseded {
            debug!(user_id = %params.user_id, old_connection = old.connection_id(), "superseding connection");
            old.close(CloseReason::Superseded);
        }

        info!(user_id = %params.user_id, organization_id = %organization_id, connection_id, "connection established");
        Ok((handle, rx))
    }

    /// Unregister a connection and drop all its room memberships.
    ///
    /// Idempotent; a stale `connection_id` (already superseded) is a no-op.
    /// Returns whether a connection was removed.
    pub fn disconnect(&self, user_id: Uuid, connection_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.registry.remove(user_id, connection_id).is_none() {
            return false;
        }
        state.rooms.remove_user(user_id);
        debug!(%user_id, connection_id, "connection removed");
        true
    }

    /// Subscribe a connected user to a project room.
    ///
    /// Returns `false` if the user is not connected; joining a room the
    /// user is already in succeeds.
    pub fn join_project_room(&self, user_id: Uuid, project_id: Uuid) -> bool {
        let mut state = self.state.lock();
        if state.registry.get(user_id).is_none() {
            return false;
        }
        state.rooms.join(RoomId::project(project_id), user_id);
        true
    }

    /// Unsubscribe a user from a project room.
    ///
    /// Returns whether the user was a member.
    pub fn leave_project_room(&self, user_id: Uuid, project_id: Uuid) -> bool {
        self.state.lock().rooms.leave(RoomId::project(project_id), user_id)
    }

    /// Deliver a frame to one user's connection, if they have one.
    pub fn send_to_user(&self, user_id: Uuid, message: &ServerMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        let handle = {
            let state = self.state.lock();
            state.registry.get(user_id).cloned()
        };
        handle.is_some_and(|h| h.send(frame))
    }

    /// Fan a frame out to every member of a room, except `exclude`.
    ///
    /// The frame is serialized once; sends happen outside the lock. Returns
    /// the number of connections that accepted the frame.
    pub fn broadcast_to_room(
        &self,
        room: RoomId,
        message: &ServerMessage,
        exclude: Option<Uuid>,
    ) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };
        let recipients: Vec<ConnectionHandle> = {
            let state = self.state.lock();
            state
                .rooms
                .members_of(room)
                .filter(|user| Some(*user) != exclude)
                .filter_map(|user| state.registry.get(user).cloned())
                .collect()
        };
        deliver(&recipients, &frame, message.kind())
    }

    /// Push a notification into an organization.
    ///
    /// With a `target` this is a plain [`Self::send_to_user`]: the
    /// notification goes to that user's connection wherever it is scoped.
    /// Without one it goes to every connection scoped to the organization.
    pub fn broadcast_notification(
        &self,
        organization_id: Uuid,
        target: Option<Uuid>,
        payload: Value,
    ) -> usize {
        let message =
            ServerMessage::Notification { payload, timestamp: self.clock.now().timestamp_millis() };
        if let Some(user) = target {
            return usize::from(self.send_to_user(user, &message));
        }
        let Some(frame) = encode(&message) else {
            return 0;
        };
        let recipients: Vec<ConnectionHandle> = {
            let state = self.state.lock();
            state.registry.in_organization(organization_id).cloned().collect()
        };
        deliver(&recipients, &frame, message.kind())
    }

    /// Push a project-level update to the project's room.
    pub fn broadcast_project_update(
        &self,
        project_id: Uuid,
        payload: Value,
        exclude: Option<Uuid>,
    ) -> usize {
        let message = ServerMessage::ProjectUpdate {
            payload,
            timestamp: self.clock.now().timestamp_millis(),
        };
        self.broadcast_to_room(RoomId::project(project_id), &message, exclude)
    }

    /// Push a task-level update to the owning project's room.
    pub fn broadcast_task_update(
        &self,
        project_id: Uuid,
        payload: Value,
        exclude: Option<Uuid>,
    ) -> usize {
        let message =
            ServerMessage::TaskUpdate { payload, timestamp: self.clock.now().timestamp_millis() };
        self.broadcast_to_room(RoomId::project(project_id), &message, exclude)
    }

    /// Deliver a one-to-one message to a user.
    pub fn send_direct_message(&self, user_id: Uuid, payload: Value) -> bool {
        let message = ServerMessage::DirectMessage {
            payload,
            timestamp: self.clock.now().timestamp_millis(),
        };
        self.send_to_user(user_id, &message)
    }

    /// Handle one raw inbound frame from a connection.
    ///
    /// Protocol errors are reported back on the same connection and never
    /// terminate it.
    pub fn route(&self, handle: &ConnectionHandle, raw: &str) {
        match parse_client_frame(raw) {
            Ok(ClientMessage::JoinProject { project_id }) => {
                self.join_project_room(handle.user_id(), project_id);
            },
            Ok(ClientMessage::LeaveProject { project_id }) => {
                self.leave_project_room(handle.user_id(), project_id);
            },
            Ok(ClientMessage::Ping) => {
                let pong =
                    ServerMessage::Pong { timestamp: self.clock.now().timestamp_millis() };
                if let Some(frame) = encode(&pong) {
                    handle.send(frame);
                }
            },
            Err(e) => {
                debug!(user_id = %handle.user_id(), error = %e, "rejected inbound frame");
                self.report(handle, &e);
            },
        }
    }

    /// Close every connection and clear all state.
    ///
    /// Returns the number of connections that were closed.
    pub fn shutdown(&self) -> usize {
        let handles = {
            let mut state = self.state.lock();
            let handles = state.registry.drain();
            for handle in &handles {
                state.rooms.remove_user(handle.user_id());
            }
            handles
        };
        for handle in &handles {
            handle.close(CloseReason::ServerShutdown);
        }
        info!(connections = handles.len(), "broker shut down");
        handles.len()
    }

    /// Live-connection counts for the admin surface.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.state.lock().registry.stats()
    }

    fn report(&self, handle: &ConnectionHandle, e: &ProtocolError) {
        let message = ServerMessage::error(e.to_string(), self.clock.now());
        if let Some(frame) = encode(&message) {
            handle.send(frame);
        }
    }
}

/// Serialize a frame once for sharing across recipients.
fn encode(message: &ServerMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::new(text)),
        Err(e) => {
            error!(kind = message.kind(), error = %e, "failed to serialize frame");
            None
        },
    }
}

/// Queue a shared frame to each recipient, counting acceptances.
fn deliver(recipients: &[ConnectionHandle], frame: &Arc<String>, kind: &str) -> usize {
    let mut delivered = 0;
    for handle in recipients {
        if handle.send(Arc::clone(frame)) {
            delivered += 1;
        } else {
            warn!(user_id = %handle.user_id(), kind, "outbound queue rejected frame");
        }
    }
    delivered
}
