//! Room membership index.
//!
//! Bidirectional index between rooms and the users in them. Both directions
//! are kept in lockstep so that broadcast fan-out (`room → users`) and
//! disconnect cleanup (`user → rooms`) are each a single lookup. Empty sets
//! are removed eagerly; the index never retains a room with no members.

use std::collections::{HashMap, HashSet};

use trellis_proto::RoomId;
use uuid::Uuid;

/// Bidirectional room membership index.
///
/// Plain data structure; the broker serializes access to it and enforces
/// the rule that only connected users join rooms.
#[derive(Debug, Default)]
pub struct RoomIndex {
    members: HashMap<RoomId, HashSet<Uuid>>,
    rooms_by_user: HashMap<Uuid, HashSet<RoomId>>,
}

impl RoomIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a room. Idempotent.
    ///
    /// Returns `true` if the user was newly added.
    pub fn join(&mut self, room: RoomId, user_id: Uuid) -> bool {
        let added = self.members.entry(room).or_default().insert(user_id);
        if added {
            self.rooms_by_user.entry(user_id).or_default().insert(room);
        }
        added
    }

    /// Remove a user from a room. Idempotent.
    ///
    /// Returns `true` if the user was a member.
    pub fn leave(&mut self, room: RoomId, user_id: Uuid) -> bool {
        let Some(members) = self.members.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&user_id);
        if members.is_empty() {
            self.members.remove(&room);
        }
        if removed
            && let Some(rooms) = self.rooms_by_user.get_mut(&user_id)
        {
            rooms.remove(&room);
            if rooms.is_empty() {
                self.rooms_by_user.remove(&user_id);
            }
        }
        removed
    }

    /// Members of a room. Empty if the room does not exist.
    pub fn members_of(&self, room: RoomId) -> impl Iterator<Item = Uuid> + '_ {
        self.members.get(&room).into_iter().flatten().copied()
    }

    /// Whether a user is in a room.
    pub fn contains(&self, room: RoomId, user_id: Uuid) -> bool {
        self.members.get(&room).is_some_and(|m| m.contains(&user_id))
    }

    /// Rooms the user is in.
    pub fn rooms_of(&self, user_id: Uuid) -> impl Iterator<Item = RoomId> + '_ {
        self.rooms_by_user.get(&user_id).into_iter().flatten().copied()
    }

    /// Remove a user from every room, returning the rooms they were in.
    pub fn remove_user(&mut self, user_id: Uuid) -> HashSet<RoomId> {
        let rooms = self.rooms_by_user.remove(&user_id).unwrap_or_default();
        for room in &rooms {
            if let Some(members) = self.members.get_mut(room) {
                members.remove(&user_id);
                if members.is_empty() {
                    self.members.remove(room);
                }
            }
        }
        rooms
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}
