//! Conversation store: the single source of truth for rooms, timelines and unread counters.
//!
//! Every mutation is a [`StoreAction`] applied through [`ConversationState::apply`], so each
//! transition can be logged and tested as a `(state, action) -> state` step. The named
//! reducer methods on [`ConversationState`] are thin wrappers building the matching action.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::types::{Message, MessageStatus, Room, RoomType};

/// Default per-room retention cap applied when prepending history.
pub const DEFAULT_MAX_MESSAGES_PER_ROOM: usize = 200;

/// Reducer input accepted by a conversation state implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Replace a room timeline; only used for a fresh initial load.
    SetMessages {
        room_id: String,
        messages: Vec<Message>,
    },
    /// Append one message unless its ID is already present.
    AddMessage { room_id: String, message: Message },
    /// Prepend older history, skipping IDs already present.
    PrependMessages {
        room_id: String,
        messages: Vec<Message>,
    },
    /// Reconcile an optimistic message with the send outcome.
    UpdateMessageStatus {
        room_id: String,
        temp_id: String,
        status: MessageStatus,
        new_id: Option<String>,
    },
    RemoveMessage { room_id: String, message_id: String },
    /// Mark the user's sent messages up to `event_id` as read by another member.
    MarkReadThrough {
        room_id: String,
        event_id: String,
        own_user_id: String,
    },
    SetActiveRoom(Option<String>),
    SetLoadingHistory(bool),
    SetHasMore { room_id: String, has_more: bool },
    UpsertRoom(Room),
    /// Replace every room of `room_type`, leaving the other partition untouched.
    ReplaceRoomPartition {
        room_type: RoomType,
        rooms: Vec<Room>,
    },
    SetUnreadCount { room_id: String, count: u32 },
    IncrementUnread { room_id: String },
    ClearUnread { room_id: String },
    /// Drop a left/deleted room and subtract its unread contribution.
    RemoveRoom { room_id: String },
}

impl StoreAction {
    /// Stable action name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetMessages { .. } => "set_messages",
            Self::AddMessage { .. } => "add_message",
            Self::PrependMessages { .. } => "prepend_messages",
            Self::UpdateMessageStatus { .. } => "update_message_status",
            Self::RemoveMessage { .. } => "remove_message",
            Self::MarkReadThrough { .. } => "mark_read_through",
            Self::SetActiveRoom(_) => "set_active_room",
            Self::SetLoadingHistory(_) => "set_loading_history",
            Self::SetHasMore { .. } => "set_has_more",
            Self::UpsertRoom(_) => "upsert_room",
            Self::ReplaceRoomPartition { .. } => "replace_room_partition",
            Self::SetUnreadCount { .. } => "set_unread_count",
            Self::IncrementUnread { .. } => "increment_unread",
            Self::ClearUnread { .. } => "clear_unread",
            Self::RemoveRoom { .. } => "remove_room",
        }
    }
}

/// What a reducer call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The action left the state untouched.
    Unchanged,
    Changed,
    /// History prepend; `unique` entries were new and `evicted` of the oldest confirmed
    /// messages were dropped to respect the retention cap.
    Prepended { unique: usize, evicted: usize },
    /// Send reconciliation; `dropped_temp` when the confirmed copy already existed.
    Reconciled { dropped_temp: bool },
}

/// Swappable state port consumed by the orchestrator.
///
/// Implementations only need [`apply`](Self::apply) and the getters; the named reducers are
/// provided in terms of `apply`.
pub trait ConversationState: Send {
    fn apply(&mut self, action: StoreAction) -> StoreOutcome;

    /// Current timeline of a room in display order (oldest first).
    fn messages(&self, room_id: &str) -> Vec<Message>;
    fn is_loading_history(&self) -> bool;
    fn active_room_id(&self) -> Option<String>;
    fn room(&self, room_id: &str) -> Option<Room>;
    /// Rooms ordered by most recent activity.
    fn rooms(&self) -> Vec<Room>;
    fn has_more(&self, room_id: &str) -> bool;
    fn total_unread_count(&self) -> u32;

    fn set_messages(&mut self, room_id: &str, messages: Vec<Message>) -> StoreOutcome {
        self.apply(StoreAction::SetMessages {
            room_id: room_id.to_owned(),
            messages,
        })
    }

    fn add_message(&mut self, room_id: &str, message: Message) -> StoreOutcome {
        self.apply(StoreAction::AddMessage {
            room_id: room_id.to_owned(),
            message,
        })
    }

    fn prepend_messages(&mut self, room_id: &str, messages: Vec<Message>) -> StoreOutcome {
        self.apply(StoreAction::PrependMessages {
            room_id: room_id.to_owned(),
            messages,
        })
    }

    fn update_message_status(
        &mut self,
        room_id: &str,
        temp_id: &str,
        status: MessageStatus,
        new_id: Option<String>,
    ) -> StoreOutcome {
        self.apply(StoreAction::UpdateMessageStatus {
            room_id: room_id.to_owned(),
            temp_id: temp_id.to_owned(),
            status,
            new_id,
        })
    }

    fn remove_message(&mut self, room_id: &str, message_id: &str) -> StoreOutcome {
        self.apply(StoreAction::RemoveMessage {
            room_id: room_id.to_owned(),
            message_id: message_id.to_owned(),
        })
    }

    fn mark_read_through(&mut self, room_id: &str, event_id: &str, own_user_id: &str) -> StoreOutcome {
        self.apply(StoreAction::MarkReadThrough {
            room_id: room_id.to_owned(),
            event_id: event_id.to_owned(),
            own_user_id: own_user_id.to_owned(),
        })
    }

    fn set_active_room(&mut self, room_id: Option<String>) -> StoreOutcome {
        self.apply(StoreAction::SetActiveRoom(room_id))
    }

    fn set_loading_history(&mut self, loading: bool) -> StoreOutcome {
        self.apply(StoreAction::SetLoadingHistory(loading))
    }

    fn set_has_more(&mut self, room_id: &str, has_more: bool) -> StoreOutcome {
        self.apply(StoreAction::SetHasMore {
            room_id: room_id.to_owned(),
            has_more,
        })
    }

    fn upsert_room(&mut self, room: Room) -> StoreOutcome {
        self.apply(StoreAction::UpsertRoom(room))
    }

    fn replace_room_partition(&mut self, room_type: RoomType, rooms: Vec<Room>) -> StoreOutcome {
        self.apply(StoreAction::ReplaceRoomPartition { room_type, rooms })
    }

    fn set_unread_count(&mut self, room_id: &str, count: u32) -> StoreOutcome {
        self.apply(StoreAction::SetUnreadCount {
            room_id: room_id.to_owned(),
            count,
        })
    }

    fn increment_unread(&mut self, room_id: &str) -> StoreOutcome {
        self.apply(StoreAction::IncrementUnread {
            room_id: room_id.to_owned(),
        })
    }

    fn clear_unread(&mut self, room_id: &str) -> StoreOutcome {
        self.apply(StoreAction::ClearUnread {
            room_id: room_id.to_owned(),
        })
    }

    fn remove_room(&mut self, room_id: &str) -> StoreOutcome {
        self.apply(StoreAction::RemoveRoom {
            room_id: room_id.to_owned(),
        })
    }

    /// ID of the oldest message currently displayed for a room.
    fn oldest_message_id(&self, room_id: &str) -> Option<String> {
        self.messages(room_id).first().map(|message| message.id.clone())
    }

    /// ID of the newest backend-confirmed message of a room.
    fn latest_confirmed_message_id(&self, room_id: &str) -> Option<String> {
        self.messages(room_id)
            .iter()
            .rev()
            .find(|message| !message.is_temporary())
            .map(|message| message.id.clone())
    }
}

/// In-memory conversation store.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    rooms: HashMap<String, Room>,
    messages: HashMap<String, Vec<Message>>,
    active_room_id: Option<String>,
    is_loading_history: bool,
    has_more: HashMap<String, bool>,
    total_unread_count: u32,
    /// Unread counts for rooms not yet present in `rooms`.
    pending_unread: HashMap<String, u32>,
    max_messages_per_room: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES_PER_ROOM)
    }
}

impl ConversationStore {
    /// Create an empty store with a per-room retention cap (`max_messages_per_room >= 1`).
    pub fn new(max_messages_per_room: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            messages: HashMap::new(),
            active_room_id: None,
            is_loading_history: false,
            has_more: HashMap::new(),
            total_unread_count: 0,
            pending_unread: HashMap::new(),
            max_messages_per_room: max_messages_per_room.max(1),
        }
    }

    /// Unread count for a room, including a not-yet-synced pending contribution.
    pub fn unread_count(&self, room_id: &str) -> u32 {
        self.rooms
            .get(room_id)
            .map(|room| room.unread_count)
            .or_else(|| self.pending_unread.get(room_id).copied())
            .unwrap_or(0)
    }

    /// Sum of pending unread counts for rooms not yet loaded.
    pub fn pending_unread_total(&self) -> u32 {
        self.pending_unread.values().sum()
    }

    fn adjust_total(&mut self, delta: i64) {
        let next = i64::from(self.total_unread_count) + delta;
        if next < 0 {
            warn!(
                total = self.total_unread_count,
                delta, "unread total would go negative; clamping to zero"
            );
        }
        self.total_unread_count = u32::try_from(next.max(0)).unwrap_or(u32::MAX);
    }

    fn refresh_last_message(&mut self, room_id: &str) {
        let latest = self
            .messages
            .get(room_id)
            .and_then(|messages| messages.last())
            .cloned();
        if let Some(room) = self.rooms.get_mut(room_id)
            && latest.is_some()
        {
            room.last_message = latest;
        }
    }

    fn reduce_set_messages(&mut self, room_id: String, messages: Vec<Message>) -> StoreOutcome {
        let mut deduped = dedupe_keep_latest(messages);
        if deduped.len() > self.max_messages_per_room {
            let excess = deduped.len() - self.max_messages_per_room;
            deduped.drain(0..excess);
        }
        debug!(room_id = %room_id, count = deduped.len(), "room timeline replaced");
        self.messages.insert(room_id.clone(), deduped);
        self.refresh_last_message(&room_id);
        StoreOutcome::Changed
    }

    fn reduce_add_message(&mut self, room_id: String, message: Message) -> StoreOutcome {
        let timeline = self.messages.entry(room_id.clone()).or_default();
        if timeline.iter().any(|existing| existing.id == message.id) {
            trace!(room_id = %room_id, message_id = %message.id, "duplicate append ignored");
            return StoreOutcome::Unchanged;
        }

        trace!(room_id = %room_id, message_id = %message.id, "message appended");
        timeline.push(message);
        self.refresh_last_message(&room_id);
        StoreOutcome::Changed
    }

    fn reduce_prepend_messages(&mut self, room_id: String, batch: Vec<Message>) -> StoreOutcome {
        let cap = self.max_messages_per_room;
        let timeline = self.messages.entry(room_id.clone()).or_default();
        let mut seen: HashSet<String> = timeline.iter().map(|message| message.id.clone()).collect();

        let unique: Vec<Message> = batch
            .into_iter()
            .filter(|message| seen.insert(message.id.clone()))
            .collect();
        let unique_count = unique.len();

        if unique_count > 0 {
            let existing = std::mem::take(timeline);
            *timeline = unique;
            timeline.extend(existing);
        }
        let evicted = evict_oldest_confirmed(timeline, cap);

        debug!(
            room_id = %room_id,
            unique = unique_count,
            evicted,
            total = timeline.len(),
            "history prepended"
        );
        StoreOutcome::Prepended {
            unique: unique_count,
            evicted,
        }
    }

    fn reduce_update_message_status(
        &mut self,
        room_id: String,
        temp_id: String,
        status: MessageStatus,
        new_id: Option<String>,
    ) -> StoreOutcome {
        let Some(timeline) = self.messages.get_mut(&room_id) else {
            warn!(room_id = %room_id, temp_id = %temp_id, "status update for unknown room timeline");
            return StoreOutcome::Unchanged;
        };
        let Some(index) = timeline.iter().position(|message| message.id == temp_id) else {
            trace!(room_id = %room_id, temp_id = %temp_id, "status update for missing message");
            return StoreOutcome::Unchanged;
        };

        // The live path may already have delivered the confirmed copy.
        if let Some(new_id) = new_id.as_deref()
            && new_id != temp_id
            && timeline.iter().any(|message| message.id == new_id)
        {
            timeline.remove(index);
            debug!(
                room_id = %room_id,
                temp_id = %temp_id,
                new_id = %new_id,
                "confirmed copy already present; dropped optimistic entry"
            );
            self.refresh_last_message(&room_id);
            return StoreOutcome::Reconciled { dropped_temp: true };
        }

        let message = &mut timeline[index];
        message.status = status;
        if let Some(new_id) = new_id {
            message.id = new_id;
        }
        debug!(
            room_id = %room_id,
            temp_id = %temp_id,
            message_id = %message.id,
            status = ?status,
            "message status updated"
        );
        self.refresh_last_message(&room_id);
        StoreOutcome::Reconciled {
            dropped_temp: false,
        }
    }

    fn reduce_remove_message(&mut self, room_id: String, message_id: String) -> StoreOutcome {
        let Some(timeline) = self.messages.get_mut(&room_id) else {
            return StoreOutcome::Unchanged;
        };
        let before = timeline.len();
        timeline.retain(|message| message.id != message_id);
        if timeline.len() == before {
            return StoreOutcome::Unchanged;
        }
        debug!(room_id = %room_id, message_id = %message_id, "message removed");
        self.refresh_last_message(&room_id);
        StoreOutcome::Changed
    }

    fn reduce_mark_read_through(
        &mut self,
        room_id: String,
        event_id: String,
        own_user_id: String,
    ) -> StoreOutcome {
        let Some(timeline) = self.messages.get_mut(&room_id) else {
            return StoreOutcome::Unchanged;
        };
        let Some(index) = timeline.iter().position(|message| message.id == event_id) else {
            return StoreOutcome::Unchanged;
        };

        let mut updated = 0_usize;
        for message in &mut timeline[..=index] {
            if message.sender_id == own_user_id && message.status == MessageStatus::Sent {
                message.status = MessageStatus::Read;
                updated += 1;
            }
        }
        if updated == 0 {
            return StoreOutcome::Unchanged;
        }
        trace!(room_id = %room_id, event_id = %event_id, updated, "messages marked read");
        self.refresh_last_message(&room_id);
        StoreOutcome::Changed
    }

    fn reduce_upsert_room(&mut self, mut room: Room) -> StoreOutcome {
        let previous = match self.rooms.get(&room.id) {
            Some(existing) => {
                if room.last_message.is_none() {
                    room.last_message = existing.last_message.clone();
                }
                existing.unread_count
            }
            None => self.pending_unread.remove(&room.id).unwrap_or(0),
        };
        self.adjust_total(i64::from(room.unread_count) - i64::from(previous));
        trace!(room_id = %room.id, unread = room.unread_count, "room upserted");
        self.rooms.insert(room.id.clone(), room);
        StoreOutcome::Changed
    }

    fn reduce_replace_room_partition(&mut self, room_type: RoomType, rooms: Vec<Room>) -> StoreOutcome {
        let incoming: HashSet<String> = rooms.iter().map(|room| room.id.clone()).collect();
        let stale: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.room_type() == room_type && !incoming.contains(&room.id))
            .map(|room| room.id.clone())
            .collect();

        for room_id in &stale {
            self.reduce_remove_room(room_id.clone());
        }
        let count = rooms.len();
        for room in rooms {
            self.reduce_upsert_room(room);
        }

        debug!(
            room_type = ?room_type,
            count,
            removed = stale.len(),
            total_unread = self.total_unread_count,
            "room partition replaced"
        );
        StoreOutcome::Changed
    }

    fn reduce_set_unread_count(&mut self, room_id: String, count: u32) -> StoreOutcome {
        let previous = match self.rooms.get_mut(&room_id) {
            Some(room) => std::mem::replace(&mut room.unread_count, count),
            None => {
                let previous = if count == 0 {
                    self.pending_unread.remove(&room_id)
                } else {
                    self.pending_unread.insert(room_id.clone(), count)
                };
                previous.unwrap_or(0)
            }
        };
        if previous == count {
            return StoreOutcome::Unchanged;
        }
        self.adjust_total(i64::from(count) - i64::from(previous));
        trace!(room_id = %room_id, count, total = self.total_unread_count, "unread count set");
        StoreOutcome::Changed
    }

    fn reduce_increment_unread(&mut self, room_id: String) -> StoreOutcome {
        match self.rooms.get_mut(&room_id) {
            Some(room) => room.unread_count = room.unread_count.saturating_add(1),
            None => {
                let pending = self.pending_unread.entry(room_id.clone()).or_insert(0);
                *pending = pending.saturating_add(1);
            }
        }
        self.adjust_total(1);
        trace!(room_id = %room_id, total = self.total_unread_count, "unread incremented");
        StoreOutcome::Changed
    }

    fn reduce_clear_unread(&mut self, room_id: String) -> StoreOutcome {
        let previous = match self.rooms.get_mut(&room_id) {
            Some(room) => std::mem::take(&mut room.unread_count),
            None => self.pending_unread.remove(&room_id).unwrap_or(0),
        };
        if previous == 0 {
            return StoreOutcome::Unchanged;
        }
        self.adjust_total(-i64::from(previous));
        trace!(room_id = %room_id, cleared = previous, total = self.total_unread_count, "unread cleared");
        StoreOutcome::Changed
    }

    fn reduce_remove_room(&mut self, room_id: String) -> StoreOutcome {
        let room_unread = self.rooms.remove(&room_id).map(|room| room.unread_count);
        let pending = self.pending_unread.remove(&room_id);
        let had_messages = self.messages.remove(&room_id).is_some();
        self.has_more.remove(&room_id);

        if room_unread.is_none() && pending.is_none() && !had_messages {
            return StoreOutcome::Unchanged;
        }

        let contribution = room_unread.unwrap_or(0) + pending.unwrap_or(0);
        self.adjust_total(-i64::from(contribution));
        if self.active_room_id.as_deref() == Some(room_id.as_str()) {
            self.active_room_id = None;
        }
        debug!(room_id = %room_id, contribution, total = self.total_unread_count, "room removed");
        StoreOutcome::Changed
    }
}

impl ConversationState for ConversationStore {
    fn apply(&mut self, action: StoreAction) -> StoreOutcome {
        let kind = action.kind();
        let outcome = match action {
            StoreAction::SetMessages { room_id, messages } => self.reduce_set_messages(room_id, messages),
            StoreAction::AddMessage { room_id, message } => self.reduce_add_message(room_id, message),
            StoreAction::PrependMessages { room_id, messages } => {
                self.reduce_prepend_messages(room_id, messages)
            }
            StoreAction::UpdateMessageStatus {
                room_id,
                temp_id,
                status,
                new_id,
            } => self.reduce_update_message_status(room_id, temp_id, status, new_id),
            StoreAction::RemoveMessage {
                room_id,
                message_id,
            } => self.reduce_remove_message(room_id, message_id),
            StoreAction::MarkReadThrough {
                room_id,
                event_id,
                own_user_id,
            } => self.reduce_mark_read_through(room_id, event_id, own_user_id),
            StoreAction::SetActiveRoom(room_id) => {
                if self.active_room_id == room_id {
                    StoreOutcome::Unchanged
                } else {
                    self.active_room_id = room_id;
                    StoreOutcome::Changed
                }
            }
            StoreAction::SetLoadingHistory(loading) => {
                if self.is_loading_history == loading {
                    StoreOutcome::Unchanged
                } else {
                    self.is_loading_history = loading;
                    StoreOutcome::Changed
                }
            }
            StoreAction::SetHasMore { room_id, has_more } => {
                if self.has_more.insert(room_id, has_more) == Some(has_more) {
                    StoreOutcome::Unchanged
                } else {
                    StoreOutcome::Changed
                }
            }
            StoreAction::UpsertRoom(room) => self.reduce_upsert_room(room),
            StoreAction::ReplaceRoomPartition { room_type, rooms } => {
                self.reduce_replace_room_partition(room_type, rooms)
            }
            StoreAction::SetUnreadCount { room_id, count } => self.reduce_set_unread_count(room_id, count),
            StoreAction::IncrementUnread { room_id } => self.reduce_increment_unread(room_id),
            StoreAction::ClearUnread { room_id } => self.reduce_clear_unread(room_id),
            StoreAction::RemoveRoom { room_id } => self.reduce_remove_room(room_id),
        };
        trace!(action = kind, outcome = ?outcome, "store action applied");
        outcome
    }

    fn messages(&self, room_id: &str) -> Vec<Message> {
        self.messages.get(room_id).cloned().unwrap_or_default()
    }

    fn is_loading_history(&self) -> bool {
        self.is_loading_history
    }

    fn active_room_id(&self) -> Option<String> {
        self.active_room_id.clone()
    }

    fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).cloned()
    }

    fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| {
            let a_ts = a.last_message.as_ref().map_or(0, |m| m.timestamp_ms);
            let b_ts = b.last_message.as_ref().map_or(0, |m| m.timestamp_ms);
            b_ts.cmp(&a_ts).then_with(|| a.id.cmp(&b.id))
        });
        rooms
    }

    fn has_more(&self, room_id: &str) -> bool {
        self.has_more.get(room_id).copied().unwrap_or(false)
    }

    fn total_unread_count(&self) -> u32 {
        self.total_unread_count
    }
}

/// Drop earlier duplicates so the latest instance of each ID wins, preserving order.
fn dedupe_keep_latest(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut reversed = Vec::with_capacity(messages.len());
    for message in messages.into_iter().rev() {
        if seen.insert(message.id.clone()) {
            reversed.push(message);
        }
    }
    reversed.reverse();
    reversed
}

/// Drop confirmed messages from the oldest end until the cap holds.
///
/// The live edge is kept intact so later appends stay contiguous. Pending and failed local
/// messages are never evicted.
fn evict_oldest_confirmed(timeline: &mut Vec<Message>, cap: usize) -> usize {
    let excess = timeline.len().saturating_sub(cap);
    if excess == 0 {
        return 0;
    }
    let mut evicted = 0;
    timeline.retain(|message| {
        let confirmed = matches!(message.status, MessageStatus::Sent | MessageStatus::Read);
        if confirmed && evicted < excess {
            evicted += 1;
            false
        } else {
            true
        }
    });
    evicted
}
