//! Direct-chat detection for rooms reported by the backend.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Membership of the signed-in user in a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

/// Room facts the heuristic needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembershipFacts<'a> {
    pub room_id: &'a str,
    pub own_membership: Membership,
    pub joined_member_count: u32,
    pub invited_member_count: u32,
}

/// Per-user record of which rooms are direct chats with whom.
///
/// Maps a counterpart user ID to the room IDs marked as direct with that user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DirectDirectory {
    entries: HashMap<String, Vec<String>>,
}

impl DirectDirectory {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any user entry lists `room_id`.
    pub fn contains_room(&self, room_id: &str) -> bool {
        self.entries
            .values()
            .any(|rooms| rooms.iter().any(|room| room == room_id))
    }

    /// Counterpart recorded for `room_id`, if any.
    pub fn counterpart(&self, room_id: &str) -> Option<&str> {
        let mut users: Vec<&String> = self
            .entries
            .iter()
            .filter(|(_, rooms)| rooms.iter().any(|room| room == room_id))
            .map(|(user_id, _)| user_id)
            .collect();
        users.sort();
        users.first().map(|user_id| user_id.as_str())
    }

    /// All rooms marked as direct.
    pub fn room_ids(&self) -> HashSet<&str> {
        self.entries
            .values()
            .flat_map(|rooms| rooms.iter().map(String::as_str))
            .collect()
    }

    pub fn insert(&mut self, user_id: impl Into<String>, room_id: impl Into<String>) {
        let rooms = self.entries.entry(user_id.into()).or_default();
        let room_id = room_id.into();
        if !rooms.contains(&room_id) {
            rooms.push(room_id);
        }
    }
}

/// Decide whether a room is a direct chat.
///
/// Rules, first match wins:
/// 1. listed in the direct directory: direct;
/// 2. own membership is leave or ban: not direct;
/// 3. joined plus invited members equal two: direct.
///
/// Rooms the user is merely invited to count as direct when rule 3 holds, and a room
/// with the user alone plus one pending invite also counts.
pub fn is_direct_room(directory: &DirectDirectory, facts: &RoomMembershipFacts<'_>) -> bool {
    if directory.contains_room(facts.room_id) {
        return true;
    }
    if matches!(facts.own_membership, Membership::Leave | Membership::Ban) {
        return false;
    }
    facts
        .joined_member_count
        .saturating_add(facts.invited_member_count)
        == 2
}

/// Pick the other participant of a direct room.
///
/// Prefers the directory entry, then the first member that is not the signed-in user,
/// falling back to the user's own ID for a self-chat.
pub fn direct_counterpart(
    directory: &DirectDirectory,
    room_id: &str,
    own_user_id: &str,
    member_ids: &[String],
) -> String {
    if let Some(user_id) = directory.counterpart(room_id) {
        return user_id.to_owned();
    }
    member_ids
        .iter()
        .find(|member| member.as_str() != own_user_id)
        .cloned()
        .unwrap_or_else(|| own_user_id.to_owned())
}
