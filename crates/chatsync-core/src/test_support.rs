use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    adapter::{ChatAdapter, EventSink, SubscriptionToken},
    error::{AdapterError, AdapterErrorCategory},
    subscription::SubscriptionRegistry,
    types::{
        Attachment, ChatRoom, DirectMessage, EventOrigin, HistoryPage, IncomingEvent, LiveUpdate,
        LocalMedia, Message, MessageStatus, Room,
    },
};

pub(crate) const ME: &str = "@me:example.org";
pub(crate) const BOB: &str = "@bob:example.org";
pub(crate) const ROOM: &str = "!room:example.org";

pub(crate) fn network_error(code: &str) -> AdapterError {
    AdapterError::new(AdapterErrorCategory::Network, code, "backend unavailable")
}

pub(crate) fn sent(id: &str, sender: &str, timestamp_ms: u64) -> Message {
    Message::text(id, sender, format!("body of {id}"), MessageStatus::Sent, timestamp_ms)
}

/// Messages `m<from>..=m<to>` from Bob, oldest first.
pub(crate) fn numbered(from: u32, to: u32) -> Vec<Message> {
    (from..=to)
        .map(|n| sent(&format!("m{n}"), BOB, u64::from(n) * 1_000))
        .collect()
}

pub(crate) fn live_event(room_id: &str, message: Message) -> LiveUpdate {
    LiveUpdate::Event(IncomingEvent {
        room_id: room_id.to_owned(),
        event_id: Some(message.id.clone()),
        sender_id: message.sender_id.clone(),
        origin: EventOrigin::Live,
        local_status: None,
        timestamp_ms: message.timestamp_ms,
        message: Some(message),
    })
}

/// Parks one adapter call until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resolves once the gated call is parked.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub user_id: Option<String>,
    pub send_results: VecDeque<Result<String, AdapterError>>,
    pub sent: Vec<(String, Option<String>, Vec<Attachment>)>,
    /// Push the live copy of a sent message before the send call returns.
    pub echo_before_ack: bool,
    /// Parks the next send before it resolves.
    pub send_gate: Option<Arc<Gate>>,
    pub initial: HashMap<String, HistoryPage>,
    pub initial_error: Option<AdapterError>,
    pub history: VecDeque<Result<HistoryPage, AdapterError>>,
    pub history_calls: Vec<(String, Option<String>, u16)>,
    /// Parks the next history request before it resolves.
    pub history_gate: Option<Arc<Gate>>,
    pub memory: HashMap<String, Vec<Message>>,
    pub upload_error: Option<AdapterError>,
    pub uploads: Vec<String>,
    pub public_rooms: Vec<ChatRoom>,
    pub public_rooms_error: Option<AdapterError>,
    pub direct: Vec<DirectMessage>,
    pub room_details: HashMap<String, Room>,
    pub leave_error: Option<AdapterError>,
    pub left: Vec<(String, bool)>,
    pub read_error: Option<AdapterError>,
    pub read_markers: Vec<(String, String)>,
    pub aliases: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct FakeAdapter {
    state: Mutex<FakeState>,
    registry: SubscriptionRegistry,
}

impl FakeAdapter {
    pub(crate) fn signed_in() -> Self {
        let adapter = Self::default();
        adapter.state().user_id = Some(ME.to_owned());
        adapter
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, update: LiveUpdate) -> usize {
        self.registry.emit(update)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    fn record_send(
        &self,
        room_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String, AdapterError> {
        let (result, echo, sender) = {
            let mut state = self.state();
            state
                .sent
                .push((room_id.to_owned(), text.map(ToOwned::to_owned), attachments.to_vec()));
            let n = state.sent.len();
            let result = state
                .send_results
                .pop_front()
                .unwrap_or_else(|| Ok(format!("$evt-{n}")));
            (result, state.echo_before_ack, state.user_id.clone().unwrap_or_default())
        };

        if echo && let Ok(event_id) = &result {
            let message = Message {
                id: event_id.clone(),
                sender_id: sender,
                status: MessageStatus::Sent,
                timestamp_ms: 1,
                text: text.map(ToOwned::to_owned),
                attachments: attachments.to_vec(),
            };
            self.registry.emit(live_event(room_id, message));
        }
        result
    }
}

#[async_trait]
impl ChatAdapter for FakeAdapter {
    fn current_user_id(&self) -> Option<String> {
        self.state().user_id.clone()
    }

    async fn send_message(&self, room_id: &str, text: &str) -> Result<String, AdapterError> {
        let gate = self.state().send_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.record_send(room_id, Some(text), &[])
    }

    async fn send_message_with_attachments(
        &self,
        room_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String, AdapterError> {
        self.record_send(room_id, text, attachments)
    }

    async fn upload_media(&self, media: &LocalMedia) -> Result<Attachment, AdapterError> {
        let mut state = self.state();
        if let Some(err) = state.upload_error.clone() {
            return Err(err);
        }
        let file_name = media.display_name();
        state.uploads.push(file_name.clone());
        Ok(Attachment::File {
            url: format!("https://media.example.org/{file_name}"),
            size: 42,
            mime_type: media.mime_type.clone(),
            file_name,
        })
    }

    async fn fetch_initial_messages(
        &self,
        room_id: &str,
        _limit: u16,
    ) -> Result<HistoryPage, AdapterError> {
        let state = self.state();
        if let Some(err) = state.initial_error.clone() {
            return Err(err);
        }
        Ok(state.initial.get(room_id).cloned().unwrap_or_default())
    }

    async fn load_history(
        &self,
        room_id: &str,
        oldest_id: Option<&str>,
        limit: u16,
    ) -> Result<HistoryPage, AdapterError> {
        let gate = self.state().history_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.state();
        state
            .history_calls
            .push((room_id.to_owned(), oldest_id.map(ToOwned::to_owned), limit));
        state.history.pop_front().unwrap_or_else(|| Ok(HistoryPage::default()))
    }

    fn timeline_snapshot(&self, room_id: &str) -> Vec<Message> {
        self.state().memory.get(room_id).cloned().unwrap_or_default()
    }

    fn subscribe_to_room(&self, room_id: &str, sink: EventSink) -> SubscriptionToken {
        self.registry.subscribe_room(room_id, sink)
    }

    fn subscribe_to_all_messages(&self, sink: EventSink) -> SubscriptionToken {
        self.registry.subscribe_all(sink)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.registry.unsubscribe(token)
    }

    async fn fetch_public_rooms(&self) -> Result<Vec<ChatRoom>, AdapterError> {
        let state = self.state();
        match state.public_rooms_error.clone() {
            Some(err) => Err(err),
            None => Ok(state.public_rooms.clone()),
        }
    }

    async fn fetch_direct_messages(&self) -> Result<Vec<DirectMessage>, AdapterError> {
        Ok(self.state().direct.clone())
    }

    async fn get_room_details(&self, room_id: &str) -> Result<Option<Room>, AdapterError> {
        Ok(self.state().room_details.get(room_id).cloned())
    }

    async fn leave_room(&self, room_id: &str, forget: bool) -> Result<(), AdapterError> {
        let mut state = self.state();
        if let Some(err) = state.leave_error.clone() {
            return Err(err);
        }
        state.left.push((room_id.to_owned(), forget));
        Ok(())
    }

    async fn mark_as_read(&self, room_id: &str, event_id: &str) -> Result<(), AdapterError> {
        let mut state = self.state();
        if let Some(err) = state.read_error.clone() {
            return Err(err);
        }
        state
            .read_markers
            .push((room_id.to_owned(), event_id.to_owned()));
        Ok(())
    }

    async fn join_or_create_room(
        &self,
        channel_key: &str,
    ) -> Result<Option<String>, AdapterError> {
        Ok(self.state().aliases.get(channel_key).cloned())
    }
}
