//! Property-based tests for RoomIndex
//!
//! These tests verify invariants that must hold for any sequence of
//! join/leave/remove operations: the two membership directions never
//! disagree, and no empty room is ever retained.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use trellis_proto::RoomId;
use trellis_server::RoomIndex;
use uuid::Uuid;

/// One operation against the index, over small pools of users and rooms.
#[derive(Debug, Clone)]
enum Op {
    Join { room: usize, user: usize },
    Leave { room: usize, user: usize },
    RemoveUser { user: usize },
}

fn op_strategy(rooms: usize, users: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..rooms, 0..users).prop_map(|(room, user)| Op::Join { room, user }),
        (0..rooms, 0..users).prop_map(|(room, user)| Op::Leave { room, user }),
        (0..users).prop_map(|user| Op::RemoveUser { user }),
    ]
}

fn pools(rooms: usize, users: usize) -> (Vec<RoomId>, Vec<Uuid>) {
    let room_ids = (0..rooms as u128).map(|i| RoomId::project(Uuid::from_u128(i + 1))).collect();
    let user_ids = (0..users as u128).map(|i| Uuid::from_u128(i + 1000)).collect();
    (room_ids, user_ids)
}

/// Reference model: a plain room → members map.
fn apply(model: &mut HashMap<RoomId, HashSet<Uuid>>, index: &mut RoomIndex, op: &Op, rooms: &[RoomId], users: &[Uuid]) {
    match *op {
        Op::Join { room, user } => {
            model.entry(rooms[room]).or_default().insert(users[user]);
            index.join(rooms[room], users[user]);
        },
        Op::Leave { room, user } => {
            if let Some(members) = model.get_mut(&rooms[room]) {
                members.remove(&users[user]);
                if members.is_empty() {
                    model.remove(&rooms[room]);
                }
            }
            index.leave(rooms[room], users[user]);
        },
        Op::RemoveUser { user } => {
            model.retain(|_, members| {
                members.remove(&users[user]);
                !members.is_empty()
            });
            index.remove_user(users[user]);
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the index agrees with a plain room → members model after
    /// any operation sequence.
    #[test]
    fn prop_matches_reference_model(
        ops in prop::collection::vec(op_strategy(4, 6), 0..60)
    ) {
        let (rooms, users) = pools(4, 6);
        let mut model: HashMap<RoomId, HashSet<Uuid>> = HashMap::new();
        let mut index = RoomIndex::new();

        for op in &ops {
            apply(&mut model, &mut index, op, &rooms, &users);
        }

        prop_assert_eq!(index.room_count(), model.len());
        for (room, members) in &model {
            let indexed: HashSet<Uuid> = index.members_of(*room).collect();
            prop_assert_eq!(&indexed, members);
        }
    }

    /// Property: both directions of the index always agree.
    #[test]
    fn prop_directions_stay_consistent(
        ops in prop::collection::vec(op_strategy(3, 5), 0..50)
    ) {
        let (rooms, users) = pools(3, 5);
        let mut model: HashMap<RoomId, HashSet<Uuid>> = HashMap::new();
        let mut index = RoomIndex::new();

        for op in &ops {
            apply(&mut model, &mut index, op, &rooms, &users);
        }

        for user in &users {
            for room in index.rooms_of(*user) {
                prop_assert!(index.contains(room, *user));
            }
        }
        for room in &rooms {
            for member in index.members_of(*room) {
                prop_assert!(index.rooms_of(member).any(|r| r == *room));
            }
        }
    }

    /// Property: removing a user leaves no trace of them.
    #[test]
    fn prop_remove_user_is_complete(
        ops in prop::collection::vec(op_strategy(4, 4), 0..40),
        victim in 0usize..4
    ) {
        let (rooms, users) = pools(4, 4);
        let mut model: HashMap<RoomId, HashSet<Uuid>> = HashMap::new();
        let mut index = RoomIndex::new();

        for op in &ops {
            apply(&mut model, &mut index, op, &rooms, &users);
        }

        index.remove_user(users[victim]);

        prop_assert_eq!(index.rooms_of(users[victim]).count(), 0);
        for room in &rooms {
            prop_assert!(!index.contains(*room, users[victim]));
        }
    }

    /// Property: join then leave is a no-op on membership.
    #[test]
    fn prop_join_leave_round_trip(
        room in 0usize..3,
        user in 0usize..3
    ) {
        let (rooms, users) = pools(3, 3);
        let mut index = RoomIndex::new();

        index.join(rooms[room], users[user]);
        index.leave(rooms[room], users[user]);

        prop_assert_eq!(index.room_count(), 0);
        prop_assert_eq!(index.rooms_of(users[user]).count(), 0);
    }
}
