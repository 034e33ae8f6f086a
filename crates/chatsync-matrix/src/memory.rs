//! In-process homeserver used by tests and the replay harness.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chatsync_core::{Clock, DirectDirectory, Membership, SystemClock};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::{
    events::{MessagesChunk, ROOM_MESSAGE, RawTimelineEvent, Unsigned},
    rooms::{RoomMember, RoomSnapshot},
    transport::{
        LocalEchoState, MatrixTransport, TimelineDirection, TimelineUpdate, TransportError,
        TransportListener, TransportNotice,
    },
};

/// Transport operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Send,
    Upload,
    Messages,
    JoinedRooms,
    RoomSnapshot,
    DirectDirectory,
    Leave,
    Forget,
    ReadMarker,
    ResolveAlias,
    Join,
    CreateRoom,
}

#[derive(Debug, Clone)]
struct StoredRoom {
    snapshot: RoomSnapshot,
    /// Oldest first; pagination tokens are indices into this list.
    events: Vec<RawTimelineEvent>,
}

#[derive(Default)]
struct State {
    rooms: BTreeMap<String, StoredRoom>,
    aliases: HashMap<String, String>,
    direct: DirectDirectory,
    faults: HashMap<Operation, VecDeque<TransportError>>,
    uploads: Vec<(String, String, usize)>,
    read_markers: Vec<(String, String)>,
    messages_calls: usize,
    next_event: u64,
    next_room: u64,
    next_media: u64,
    listener: Option<TransportListener>,
}

impl State {
    fn take_fault(&mut self, operation: Operation) -> Result<(), TransportError> {
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn room_mut(&mut self, room_id: &str) -> Result<&mut StoredRoom, TransportError> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| TransportError::not_found(format!("unknown room {room_id}")))
    }

    fn next_event_id(&mut self) -> String {
        self.next_event += 1;
        format!("$evt-{}", self.next_event)
    }
}

/// Homeserver simulation with injectable faults.
///
/// Event IDs are `$evt-<n>`, created rooms are `!r<n>:<server>`, and `/messages`
/// tokens are `t<index>`. Sends emit a `Sending` local echo, then either a `NotSent`
/// echo (on an injected fault) or the remote echo, before returning.
#[derive(Clone)]
pub struct InMemoryTransport {
    user_id: Option<String>,
    server_name: String,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new(user_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            server_name: server_name.into(),
            clock: Arc::new(SystemClock),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// A transport without a session.
    pub fn signed_out(server_name: impl Into<String>) -> Self {
        Self {
            user_id: None,
            server_name: server_name.into(),
            clock: Arc::new(SystemClock),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Stamp sent events with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn own_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_default()
    }

    fn notify(&self, notice: TransportNotice) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener(notice);
        }
    }

    fn notify_timeline(
        &self,
        room_id: &str,
        event: RawTimelineEvent,
        local_echo: Option<LocalEchoState>,
    ) {
        self.notify(TransportNotice::Timeline(TimelineUpdate {
            room_id: room_id.to_owned(),
            event,
            direction: TimelineDirection::Forward,
            local_echo,
        }));
    }

    /// Add or replace a room. Its existing history is kept.
    pub fn seed_room(&self, snapshot: RoomSnapshot) {
        let mut state = self.lock();
        let room_id = snapshot.room_id.clone();
        if let Some(alias) = snapshot.canonical_alias.clone() {
            state.aliases.insert(alias, room_id.clone());
        }
        match state.rooms.get_mut(&room_id) {
            Some(room) => room.snapshot = snapshot,
            None => {
                state.rooms.insert(
                    room_id,
                    StoredRoom {
                        snapshot,
                        events: Vec::new(),
                    },
                );
            }
        }
    }

    /// Seed a joined channel with `members` (the signed-in user is added).
    pub fn seed_channel(&self, room_id: &str, name: &str, members: &[&str]) {
        let own = self.user_id.clone();
        let mut all: Vec<RoomMember> = Vec::new();
        for user_id in own.as_deref().into_iter().chain(members.iter().copied()) {
            if !all.iter().any(|member| member.user_id == user_id) {
                all.push(RoomMember {
                    user_id: user_id.to_owned(),
                    display_name: None,
                    avatar_url: None,
                });
            }
        }
        self.seed_room(RoomSnapshot {
            room_id: room_id.to_owned(),
            name: Some(name.to_owned()),
            canonical_alias: None,
            topic: None,
            avatar_url: None,
            own_membership: Membership::Join,
            joined_member_count: all.len() as u32,
            invited_member_count: 0,
            members: all,
            unread_notifications: 0,
            latest_event: None,
        });
    }

    pub fn set_direct(&self, user_id: &str, room_id: &str) {
        self.lock().direct.insert(user_id, room_id);
    }

    pub fn set_alias(&self, alias: &str, room_id: &str) {
        self.lock().aliases.insert(alias.to_owned(), room_id.to_owned());
    }

    /// Append history without notifying the listener; returns the event ID.
    pub fn seed_text(&self, room_id: &str, sender: &str, body: &str, ts: u64) -> String {
        let mut state = self.lock();
        let event_id = state.next_event_id();
        let event = text_event(Some(event_id.clone()), sender, body, ts);
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.snapshot.latest_event = Some(event.clone());
            room.events.push(event);
        }
        event_id
    }

    /// Deliver a new event from another client through the listener.
    pub fn inject_event(&self, room_id: &str, mut event: RawTimelineEvent) -> String {
        let event_id = {
            let mut state = self.lock();
            let event_id = match event.event_id.clone() {
                Some(id) => id,
                None => state.next_event_id(),
            };
            event.event_id = Some(event_id.clone());
            if let Some(room) = state.rooms.get_mut(room_id) {
                room.snapshot.latest_event = Some(event.clone());
                if event.sender != self.own_user_id() {
                    room.snapshot.unread_notifications += 1;
                }
                room.events.push(event.clone());
            }
            event_id
        };
        self.notify_timeline(room_id, event, None);
        event_id
    }

    pub fn inject_text(&self, room_id: &str, sender: &str, body: &str, ts: u64) -> String {
        self.inject_event(room_id, text_event(None, sender, body, ts))
    }

    /// Emit a local echo of our own without storing anything.
    pub fn push_local_echo(&self, room_id: &str, body: &str, ts: u64, state: LocalEchoState) {
        let mut event = text_event(None, &self.own_user_id(), body, ts);
        event.unsigned.transaction_id = Some(format!("echo-{ts}"));
        self.notify_timeline(room_id, event, Some(state));
    }

    pub fn inject_receipt(&self, room_id: &str, event_id: &str, user_id: &str) {
        self.notify(TransportNotice::Receipt {
            room_id: room_id.to_owned(),
            event_id: event_id.to_owned(),
            user_id: user_id.to_owned(),
        });
    }

    /// Make the next call of `operation` fail with `err`.
    pub fn fail_next(&self, operation: Operation, err: TransportError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    pub fn read_markers(&self) -> Vec<(String, String)> {
        self.lock().read_markers.clone()
    }

    pub fn messages_calls(&self) -> usize {
        self.lock().messages_calls
    }

    /// Stored events of a room, oldest first.
    pub fn room_events(&self, room_id: &str) -> Vec<RawTimelineEvent> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|room| room.events.clone())
            .unwrap_or_default()
    }

    /// `(content URI, content type, byte count)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.lock().uploads.clone()
    }

    pub fn membership(&self, room_id: &str) -> Option<Membership> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|room| room.snapshot.own_membership)
    }

    fn alias_for(&self, localpart: &str) -> String {
        format!("#{localpart}:{}", self.server_name)
    }
}

fn text_event(event_id: Option<String>, sender: &str, body: &str, ts: u64) -> RawTimelineEvent {
    RawTimelineEvent {
        event_type: ROOM_MESSAGE.to_owned(),
        event_id,
        sender: sender.to_owned(),
        origin_server_ts: ts,
        room_id: None,
        content: json!({ "msgtype": "m.text", "body": body }),
        unsigned: Unsigned::default(),
        state_key: None,
        redacted_because: None,
    }
}

fn store_sent(
    state: &mut State,
    room_id: &str,
    event: &mut RawTimelineEvent,
) -> Result<String, TransportError> {
    state.take_fault(Operation::Send)?;
    state.room_mut(room_id)?;
    let event_id = state.next_event_id();
    event.event_id = Some(event_id.clone());
    let room = state.room_mut(room_id)?;
    room.snapshot.latest_event = Some(event.clone());
    room.events.push(event.clone());
    Ok(event_id)
}

fn parse_token(token: &str) -> Result<usize, TransportError> {
    token
        .strip_prefix('t')
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| TransportError::http(400, "M_INVALID_PARAM", format!("bad token {token}")))
}

#[async_trait]
impl MatrixTransport for InMemoryTransport {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn send_event(
        &self,
        room_id: &str,
        txn_id: &str,
        event_type: &str,
        content: Value,
    ) -> Result<String, TransportError> {
        let mut echo = RawTimelineEvent {
            event_type: event_type.to_owned(),
            event_id: None,
            sender: self.own_user_id(),
            origin_server_ts: self.clock.now_ms(),
            room_id: Some(room_id.to_owned()),
            content,
            unsigned: Unsigned {
                transaction_id: Some(txn_id.to_owned()),
                ..Unsigned::default()
            },
            state_key: None,
            redacted_because: None,
        };
        self.notify_timeline(room_id, echo.clone(), Some(LocalEchoState::Sending));

        let outcome = store_sent(&mut self.lock(), room_id, &mut echo);

        match outcome {
            Ok(event_id) => {
                trace!(room_id, txn_id, event_id = %event_id, "event stored");
                self.notify_timeline(room_id, echo, None);
                Ok(event_id)
            }
            Err(err) => {
                echo.event_id = None;
                self.notify_timeline(room_id, echo, Some(LocalEchoState::NotSent));
                Err(err)
            }
        }
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<String, TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::Upload)?;
        state.next_media += 1;
        let uri = format!("mxc://{}/media{}", self.server_name, state.next_media);
        debug!(file_name, content_type, size = bytes.len(), uri = %uri, "upload stored");
        state
            .uploads
            .push((uri.clone(), content_type.to_owned(), bytes.len()));
        Ok(uri)
    }

    async fn messages(
        &self,
        room_id: &str,
        from: Option<&str>,
        limit: u16,
    ) -> Result<MessagesChunk, TransportError> {
        let mut state = self.lock();
        state.messages_calls += 1;
        state.take_fault(Operation::Messages)?;
        let room = state.room_mut(room_id)?;

        let end_index = match from {
            Some(token) => parse_token(token)?.min(room.events.len()),
            None => room.events.len(),
        };
        let start = end_index.saturating_sub(usize::from(limit.max(1)));
        let chunk: Vec<RawTimelineEvent> = room.events[start..end_index].iter().rev().cloned().collect();
        Ok(MessagesChunk {
            chunk,
            end: (start > 0).then(|| format!("t{start}")),
        })
    }

    async fn joined_rooms(&self) -> Result<Vec<RoomSnapshot>, TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::JoinedRooms)?;
        Ok(state
            .rooms
            .values()
            .filter(|room| {
                matches!(
                    room.snapshot.own_membership,
                    Membership::Join | Membership::Invite
                )
            })
            .map(|room| room.snapshot.clone())
            .collect())
    }

    async fn room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::RoomSnapshot)?;
        Ok(state.rooms.get(room_id).map(|room| room.snapshot.clone()))
    }

    async fn direct_directory(&self) -> Result<DirectDirectory, TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::DirectDirectory)?;
        Ok(state.direct.clone())
    }

    async fn leave(&self, room_id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::Leave)?;
        state.room_mut(room_id)?.snapshot.own_membership = Membership::Leave;
        Ok(())
    }

    async fn forget(&self, room_id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::Forget)?;
        let room = state.room_mut(room_id)?;
        if !matches!(
            room.snapshot.own_membership,
            Membership::Leave | Membership::Ban
        ) {
            return Err(TransportError::http(
                400,
                "M_UNKNOWN",
                "user must leave the room before forgetting it",
            ));
        }
        state.rooms.remove(room_id);
        state.aliases.retain(|_, target| target != room_id);
        Ok(())
    }

    async fn send_read_marker(&self, room_id: &str, event_id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::ReadMarker)?;
        state.room_mut(room_id)?.snapshot.unread_notifications = 0;
        state
            .read_markers
            .push((room_id.to_owned(), event_id.to_owned()));
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, TransportError> {
        let mut state = self.lock();
        state.take_fault(Operation::ResolveAlias)?;
        Ok(state.aliases.get(alias).cloned())
    }

    async fn join(&self, room_id_or_alias: &str) -> Result<String, TransportError> {
        let own = self.own_user_id();
        let mut state = self.lock();
        state.take_fault(Operation::Join)?;
        let room_id = match state.aliases.get(room_id_or_alias) {
            Some(room_id) => room_id.clone(),
            None => room_id_or_alias.to_owned(),
        };
        let room = state.room_mut(&room_id)?;
        if room.snapshot.own_membership == Membership::Ban {
            return Err(TransportError::http(403, "M_FORBIDDEN", "banned from room"));
        }
        if room.snapshot.own_membership != Membership::Join {
            room.snapshot.own_membership = Membership::Join;
            room.snapshot.joined_member_count += 1;
            if !room.snapshot.members.iter().any(|member| member.user_id == own) {
                room.snapshot.members.push(RoomMember {
                    user_id: own,
                    display_name: None,
                    avatar_url: None,
                });
            }
        }
        Ok(room_id)
    }

    async fn create_room(
        &self,
        alias_localpart: &str,
        name: &str,
    ) -> Result<String, TransportError> {
        let alias = self.alias_for(alias_localpart);
        let own = self.own_user_id();
        let mut state = self.lock();
        state.take_fault(Operation::CreateRoom)?;
        if state.aliases.contains_key(&alias) {
            return Err(TransportError::http(
                400,
                "M_ROOM_IN_USE",
                format!("alias {alias} already exists"),
            ));
        }
        state.next_room += 1;
        let room_id = format!("!r{}:{}", state.next_room, self.server_name);
        state.aliases.insert(alias.clone(), room_id.clone());
        state.rooms.insert(
            room_id.clone(),
            StoredRoom {
                snapshot: RoomSnapshot {
                    room_id: room_id.clone(),
                    name: Some(name.to_owned()),
                    canonical_alias: Some(alias),
                    topic: None,
                    avatar_url: None,
                    own_membership: Membership::Join,
                    joined_member_count: 1,
                    invited_member_count: 0,
                    members: vec![RoomMember {
                        user_id: own,
                        display_name: None,
                        avatar_url: None,
                    }],
                    unread_notifications: 0,
                    latest_event: None,
                },
                events: Vec::new(),
            },
        );
        Ok(room_id)
    }

    fn set_listener(&self, listener: TransportListener) {
        self.lock().listener = Some(listener);
    }
}
