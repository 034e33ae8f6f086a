//! Chat repository: the use-case layer between a UI and the protocol adapter.
//!
//! Every operation is async, returns a typed [`ChatError`] on failure and writes its
//! results into the shared [`ConversationState`]. Store locks are never held across an
//! adapter call, and subscription sinks release the lock before invoking user callbacks.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, info, warn};

use crate::{
    adapter::{ChatAdapter, EventSink, SubscriptionToken},
    classifier::{Classification, ClassifyMode, EventClassifier},
    clock::{Clock, SystemClock},
    config::SyncConfig,
    directory::ChannelDirectory,
    error::ChatError,
    identity::{InMemoryIdentityCache, IdentityCache, MessageWithSender, enrich, resolve_sender},
    pagination::{PageSource, PaginationEngine},
    store::{ConversationState, StoreOutcome},
    types::{
        Attachment, ChatRoom, LiveUpdate, LocalMedia, Message, MessageNotification, MessageStatus,
        PublicChannel, Room, RoomKind, RoomType, temp_message_id,
    },
};

/// Callback receiving notifications from the all-rooms subscription.
pub type NotificationHandler = Arc<dyn Fn(MessageNotification) + Send + Sync + 'static>;

/// Result of a "load more" request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    Loaded {
        /// Messages actually added to the timeline.
        added: usize,
        /// Whether older history may still be loaded.
        has_more: bool,
        /// Where the page came from.
        source: PageSource,
    },
    /// Another history load for the store is in flight.
    AlreadyLoading,
}

/// Coordinates a [`ChatAdapter`] with the shared conversation state.
///
/// UI layers read through the snapshot accessors or the [`Self::state`] handle.
pub struct ChatRepository<A, S, D>
where
    A: ChatAdapter + 'static,
    S: ConversationState + 'static,
    D: ChannelDirectory,
{
    adapter: Arc<A>,
    state: Arc<Mutex<S>>,
    directory: D,
    identities: Arc<dyn IdentityCache>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    pagination: PaginationEngine,
    last_temp_ts: AtomicU64,
}

impl<A, S, D> ChatRepository<A, S, D>
where
    A: ChatAdapter + 'static,
    S: ConversationState + 'static,
    D: ChannelDirectory,
{
    /// Build a repository with the system clock and an in-memory identity cache.
    pub fn new(adapter: Arc<A>, state: Arc<Mutex<S>>, directory: D, config: SyncConfig) -> Self {
        let pagination = PaginationEngine::from_config(&config);
        Self {
            adapter,
            state,
            directory,
            identities: Arc::new(InMemoryIdentityCache::default()),
            clock: Arc::new(SystemClock),
            config,
            pagination,
            last_temp_ts: AtomicU64::new(0),
        }
    }

    /// Replace the identity cache used to resolve message senders.
    pub fn with_identity_cache(mut self, identities: Arc<dyn IdentityCache>) -> Self {
        self.identities = identities;
        self
    }

    /// Replace the clock used for optimistic message IDs and timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The backend adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Shared handle to the conversation state, for UI reads.
    pub fn state(&self) -> Arc<Mutex<S>> {
        self.state.clone()
    }

    /// Sync settings the repository was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of a room's timeline, oldest first.
    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.lock().messages(room_id)
    }

    /// Snapshot of all known rooms, most recently active first.
    pub fn rooms(&self) -> Vec<Room> {
        self.lock().rooms()
    }

    /// Sum of unread counts across all rooms.
    pub fn total_unread_count(&self) -> u32 {
        self.lock().total_unread_count()
    }

    /// Whether older history may still be loaded for a room.
    pub fn has_more(&self, room_id: &str) -> bool {
        self.lock().has_more(room_id)
    }

    /// Whether a history page load is in flight.
    pub fn is_loading_history(&self) -> bool {
        self.lock().is_loading_history()
    }

    // ---- sending ----

    /// Send a text message with optimistic display; returns the confirmed event ID.
    pub async fn send_message(&self, room_id: &str, text: &str) -> Result<String, ChatError> {
        self.send_with_attachments(room_id, Some(text), Vec::new()).await
    }

    /// Send already-uploaded attachments with an optional caption as one message.
    pub async fn send_with_attachments(
        &self,
        room_id: &str,
        text: Option<&str>,
        attachments: Vec<Attachment>,
    ) -> Result<String, ChatError> {
        let text = normalize_text(text);
        if text.is_none() && attachments.is_empty() {
            return Err(ChatError::InvalidMessage);
        }

        let now = self.clock.now_ms();
        let temp_id = temp_message_id(self.next_temp_timestamp(now));
        let optimistic = Message {
            id: temp_id.clone(),
            sender_id: self.adapter.current_user_id().unwrap_or_default(),
            status: MessageStatus::Sending,
            timestamp_ms: now,
            text: text.clone(),
            attachments: attachments.clone(),
        };
        self.lock().add_message(room_id, optimistic);
        debug!(room_id = %room_id, temp_id = %temp_id, "optimistic message added");

        self.dispatch_send(room_id, &temp_id, text.as_deref(), &attachments)
            .await
    }

    /// Upload local files, then send them as one message.
    ///
    /// Upload failures abort before any optimistic message is created.
    pub async fn send_media(
        &self,
        room_id: &str,
        text: Option<&str>,
        files: &[LocalMedia],
    ) -> Result<String, ChatError> {
        if normalize_text(text).is_none() && files.is_empty() {
            return Err(ChatError::InvalidMessage);
        }

        let mut attachments = Vec::with_capacity(files.len());
        for media in files {
            let attachment = self.adapter.upload_media(media).await.map_err(|source| {
                warn!(room_id = %room_id, file = %media.display_name(), error = %source, "upload failed");
                ChatError::UploadFailed {
                    file_name: media.display_name(),
                    source,
                }
            })?;
            attachments.push(attachment);
        }

        self.send_with_attachments(room_id, text, attachments).await
    }

    /// Resend a message left in the failed state.
    ///
    /// Returns `Ok(None)` when no failed message with that ID exists.
    pub async fn retry_message(
        &self,
        room_id: &str,
        message_id: &str,
    ) -> Result<Option<String>, ChatError> {
        let failed = {
            let mut state = self.lock();
            let failed = state
                .messages(room_id)
                .into_iter()
                .find(|message| message.id == message_id && message.status == MessageStatus::Failed);
            if failed.is_some() {
                state.update_message_status(room_id, message_id, MessageStatus::Sending, None);
            }
            failed
        };
        let Some(failed) = failed else {
            return Ok(None);
        };

        info!(room_id = %room_id, message_id = %message_id, "retrying failed message");
        self.dispatch_send(room_id, message_id, failed.text.as_deref(), &failed.attachments)
            .await
            .map(Some)
    }

    /// Drop a failed message the user gave up on. Only failed messages are removed.
    pub fn remove_failed_message(&self, room_id: &str, message_id: &str) -> bool {
        let mut state = self.lock();
        let is_failed = state
            .messages(room_id)
            .iter()
            .any(|message| message.id == message_id && message.status == MessageStatus::Failed);
        if is_failed {
            state.remove_message(room_id, message_id);
        }
        is_failed
    }

    async fn dispatch_send(
        &self,
        room_id: &str,
        temp_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String, ChatError> {
        let result = match (text, attachments.is_empty()) {
            (Some(text), true) => self.adapter.send_message(room_id, text).await,
            _ => {
                self.adapter
                    .send_message_with_attachments(room_id, text, attachments)
                    .await
            }
        };

        match result {
            Ok(event_id) => {
                self.lock().update_message_status(
                    room_id,
                    temp_id,
                    MessageStatus::Sent,
                    Some(event_id.clone()),
                );
                debug!(room_id = %room_id, temp_id = %temp_id, event_id = %event_id, "message confirmed");
                Ok(event_id)
            }
            Err(source) => {
                self.lock()
                    .update_message_status(room_id, temp_id, MessageStatus::Failed, None);
                warn!(room_id = %room_id, temp_id = %temp_id, error = %source, "message send failed");
                Err(ChatError::MessageSendFailed {
                    room_id: room_id.to_owned(),
                    temp_id: temp_id.to_owned(),
                    source,
                })
            }
        }
    }

    fn next_temp_timestamp(&self, now: u64) -> u64 {
        let mut previous = self.last_temp_ts.load(Ordering::Relaxed);
        loop {
            let next = now.max(previous.saturating_add(1));
            match self.last_temp_ts.compare_exchange_weak(
                previous,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(current) => previous = current,
            }
        }
    }

    // ---- history ----

    /// Load the most recent page of a room, replacing its timeline.
    ///
    /// Local messages still pending or failed are kept after the fetched page. On failure
    /// the timeline already displayed is left untouched.
    pub async fn load_messages(&self, room_id: &str) -> Result<usize, ChatError> {
        let page = self
            .adapter
            .fetch_initial_messages(room_id, self.config.initial_page_size)
            .await
            .map_err(|source| {
                warn!(room_id = %room_id, error = %source, "initial load failed");
                ChatError::room_scoped("load_messages", room_id, source)
            })?;

        let mut state = self.lock();
        let fetched: HashSet<&str> = page.messages.iter().map(|message| message.id.as_str()).collect();
        let local: Vec<Message> = state
            .messages(room_id)
            .into_iter()
            .filter(|message| message.is_temporary() && !fetched.contains(message.id.as_str()))
            .collect();

        let count = page.messages.len();
        let mut timeline = page.messages;
        timeline.extend(local);
        state.set_messages(room_id, timeline);
        state.set_has_more(room_id, page.has_more);
        info!(room_id = %room_id, count, has_more = page.has_more, "room messages loaded");
        Ok(count)
    }

    /// Prepend older history, preferring the adapter's in-memory timeline.
    ///
    /// Concurrent calls are dropped while one is in flight. A total failure leaves
    /// `has_more` untouched so the user can retry.
    pub async fn load_more_messages(&self, room_id: &str) -> Result<LoadMoreOutcome, ChatError> {
        let (oldest, network_allowed) = {
            let mut state = self.lock();
            if state.is_loading_history() {
                debug!(room_id = %room_id, "history load already in flight");
                return Ok(LoadMoreOutcome::AlreadyLoading);
            }
            state.set_loading_history(true);
            (state.oldest_message_id(room_id), state.has_more(room_id))
        };
        let _loading = LoadingFlag {
            state: self.state.clone(),
        };

        let mut outcome = self
            .pagination
            .load_more(
                self.adapter.as_ref(),
                room_id,
                oldest.as_deref(),
                self.config.pagination_target,
                network_allowed,
            )
            .await;

        if outcome.messages.is_empty()
            && let Some(source) = outcome.failure.take()
        {
            return Err(ChatError::PaginationFailed {
                room_id: room_id.to_owned(),
                source,
            });
        }

        let mut state = self.lock();
        let (added, evicted) = match state.prepend_messages(room_id, outcome.messages) {
            StoreOutcome::Prepended { unique, evicted } => (unique.saturating_sub(evicted), evicted),
            _ => (0, 0),
        };
        // History evicted by the retention cap stays reachable until the window is full.
        let has_more = if evicted > 0 { added > 0 } else { outcome.has_more };
        state.set_has_more(room_id, has_more);
        debug!(
            room_id = %room_id,
            added,
            evicted,
            has_more,
            source = ?outcome.source,
            "older messages prepended"
        );
        Ok(LoadMoreOutcome::Loaded {
            added,
            has_more,
            source: outcome.source,
        })
    }

    // ---- live updates ----

    /// Append live messages of one room to the store.
    pub fn subscribe_to_room(&self, room_id: &str) -> SubscriptionToken {
        let subscribed_room = room_id.to_owned();
        let state = self.state.clone();
        let own_user_id = self.adapter.current_user_id();
        let classifier = Mutex::new(EventClassifier::from_config(&self.config));

        let sink: EventSink = Arc::new(move |update| match update {
            LiveUpdate::Event(event) => {
                if event.room_id != subscribed_room {
                    return;
                }
                let verdict = lock_mutex(&classifier).classify(event, ClassifyMode::Room);
                if let Classification::Deliver(message) = verdict {
                    lock_mutex(&state).add_message(&subscribed_room, message);
                }
            }
            LiveUpdate::Receipt(receipt) => {
                apply_receipt(&state, own_user_id.as_deref(), &receipt.room_id, &receipt.user_id, &receipt.event_id);
            }
        });

        let token = self.adapter.subscribe_to_room(room_id, sink);
        debug!(room_id = %room_id, token = token.0, "room subscription registered");
        token
    }

    /// Watch every room: append to the active room, count unread elsewhere, notify.
    pub fn subscribe_to_all_messages(&self, on_message: NotificationHandler) -> SubscriptionToken {
        let state = self.state.clone();
        let identities = self.identities.clone();
        let clock = self.clock.clone();
        let own_user_id = self.adapter.current_user_id();
        let classifier = Mutex::new(EventClassifier::from_config(&self.config));

        let sink: EventSink = Arc::new(move |update| {
            let event = match update {
                LiveUpdate::Event(event) => event,
                LiveUpdate::Receipt(receipt) => {
                    apply_receipt(&state, own_user_id.as_deref(), &receipt.room_id, &receipt.user_id, &receipt.event_id);
                    return;
                }
            };

            let room_id = event.room_id.clone();
            let is_active_room = lock_mutex(&state).active_room_id().as_deref() == Some(room_id.as_str());
            let mode = if is_active_room {
                ClassifyMode::Room
            } else {
                ClassifyMode::Notification {
                    now_ms: clock.now_ms(),
                }
            };
            let Classification::Deliver(message) = lock_mutex(&classifier).classify(event, mode) else {
                return;
            };

            let is_own = own_user_id.as_deref() == Some(message.sender_id.as_str());
            let room_name = {
                let mut state = lock_mutex(&state);
                if is_active_room {
                    state.add_message(&room_id, message.clone());
                } else {
                    if !is_own {
                        state.increment_unread(&room_id);
                    }
                    if let Some(mut room) = state.room(&room_id) {
                        room.last_message = Some(message.clone());
                        state.upsert_room(room);
                    }
                }
                state
                    .room(&room_id)
                    .map(|room| room.name)
                    .unwrap_or_else(|| room_id.clone())
            };

            if is_own {
                return;
            }
            let sender_name = resolve_sender(identities.as_ref(), &message.sender_id).display_name;
            on_message(MessageNotification {
                room_id,
                room_name,
                sender_name,
                message,
                is_active_room,
            });
        });

        let token = self.adapter.subscribe_to_all_messages(sink);
        debug!(token = token.0, "all-rooms subscription registered");
        token
    }

    /// Cancel a subscription. Returns `false` for unknown or already cancelled tokens.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.adapter.unsubscribe(token)
    }

    // ---- room lists ----

    /// Merge the channel catalog with live channel state and replace the channel partition.
    pub async fn sync_channels(&self) -> Result<usize, ChatError> {
        let catalog = self
            .directory
            .public_channels()
            .await
            .map_err(|source| ChatError::Network {
                operation: "sync_channels",
                source,
            })?;
        let live = self
            .adapter
            .fetch_public_rooms()
            .await
            .map_err(|source| ChatError::Network {
                operation: "sync_channels",
                source,
            })?;

        let rooms = merge_channels(catalog, live);
        let count = rooms.len();
        self.lock().replace_room_partition(RoomType::Channel, rooms);
        info!(count, "channels synced");
        Ok(count)
    }

    /// Replace the direct-chat partition with the adapter's current list.
    pub async fn sync_direct_messages(&self) -> Result<usize, ChatError> {
        let direct = self
            .adapter
            .fetch_direct_messages()
            .await
            .map_err(|source| ChatError::Network {
                operation: "sync_direct_messages",
                source,
            })?;

        let rooms: Vec<Room> = direct.into_iter().map(Room::from).collect();
        let count = rooms.len();
        self.lock().replace_room_partition(RoomType::Direct, rooms);
        info!(count, "direct messages synced");
        Ok(count)
    }

    /// Clear the unread count and move the backend read marker to the newest confirmed event
    /// known, from the displayed timeline or the room's last message.
    pub async fn mark_as_read(&self, room_id: &str) -> Result<(), ChatError> {
        let latest = {
            let mut state = self.lock();
            state.clear_unread(room_id);
            let displayed = state
                .messages(room_id)
                .into_iter()
                .rev()
                .find(|message| !message.is_temporary());
            let last = state
                .room(room_id)
                .and_then(|room| room.last_message)
                .filter(|message| !message.is_temporary());
            match (displayed, last) {
                (Some(displayed), Some(last)) if last.timestamp_ms > displayed.timestamp_ms => {
                    Some(last.id)
                }
                (Some(displayed), _) => Some(displayed.id),
                (None, last) => last.map(|message| message.id),
            }
        };
        let Some(event_id) = latest else {
            return Ok(());
        };

        self.adapter
            .mark_as_read(room_id, &event_id)
            .await
            .map_err(|source| {
                warn!(room_id = %room_id, event_id = %event_id, error = %source, "read marker update failed");
                ChatError::room_scoped("mark_as_read", room_id, source)
            })
    }

    /// Leave a room and drop it from the store.
    pub async fn leave_room(&self, room_id: &str) -> Result<(), ChatError> {
        self.depart(room_id, false).await
    }

    /// Leave and forget a direct chat.
    pub async fn delete_chat(&self, room_id: &str) -> Result<(), ChatError> {
        self.depart(room_id, true).await
    }

    async fn depart(&self, room_id: &str, forget: bool) -> Result<(), ChatError> {
        self.adapter
            .leave_room(room_id, forget)
            .await
            .map_err(|source| {
                warn!(room_id = %room_id, forget, error = %source, "leave failed");
                ChatError::room_scoped(if forget { "delete_chat" } else { "leave_room" }, room_id, source)
            })?;
        self.lock().remove_room(room_id);
        info!(room_id = %room_id, forget, "room left");
        Ok(())
    }

    // ---- navigation ----

    /// Make a room active, load its messages and mark it read.
    pub async fn open_room(&self, room_id: &str) -> Result<usize, ChatError> {
        self.lock().set_active_room(Some(room_id.to_owned()));
        let count = self.load_messages(room_id).await?;
        if let Err(err) = self.mark_as_read(room_id).await {
            warn!(room_id = %room_id, error = %err, "could not mark opened room as read");
        }
        Ok(count)
    }

    /// Clear the active room; live messages count as unread again.
    pub fn close_room(&self) {
        self.lock().set_active_room(None);
    }

    /// Join the room behind a channel key, creating it when missing.
    pub async fn join_channel(&self, channel_key: &str) -> Result<String, ChatError> {
        let joined = self
            .adapter
            .join_or_create_room(channel_key)
            .await
            .map_err(|source| ChatError::Network {
                operation: "join_channel",
                source,
            })?;
        match joined {
            Some(room_id) => {
                info!(channel_key = %channel_key, room_id = %room_id, "channel joined");
                Ok(room_id)
            }
            None => Err(ChatError::RoomNotFound {
                room_id: channel_key.to_owned(),
                source: None,
            }),
        }
    }

    /// Fetch a room's details and refresh it in the store.
    pub async fn room_details(&self, room_id: &str) -> Result<Room, ChatError> {
        let room = self
            .adapter
            .get_room_details(room_id)
            .await
            .map_err(|source| ChatError::room_scoped("room_details", room_id, source))?
            .ok_or_else(|| ChatError::RoomNotFound {
                room_id: room_id.to_owned(),
                source: None,
            })?;
        self.lock().upsert_room(room.clone());
        Ok(room)
    }

    /// Timeline of a room joined with resolved sender identities.
    pub fn messages_with_senders(&self, room_id: &str) -> Vec<MessageWithSender> {
        let own_user_id = self.adapter.current_user_id();
        self.messages(room_id)
            .into_iter()
            .map(|message| enrich(self.identities.as_ref(), own_user_id.as_deref(), message))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        lock_mutex(&self.state)
    }
}

/// Clears the history-loading flag when the load finishes or is cancelled.
struct LoadingFlag<S: ConversationState> {
    state: Arc<Mutex<S>>,
}

impl<S: ConversationState> Drop for LoadingFlag<S> {
    fn drop(&mut self) {
        lock_mutex(&self.state).set_loading_history(false);
    }
}

fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize_text(text: Option<&str>) -> Option<String> {
    text.filter(|text| !text.trim().is_empty())
        .map(ToOwned::to_owned)
}

fn apply_receipt<S: ConversationState>(
    state: &Mutex<S>,
    own_user_id: Option<&str>,
    room_id: &str,
    reader_id: &str,
    event_id: &str,
) {
    let Some(own_user_id) = own_user_id else {
        return;
    };
    if reader_id == own_user_id {
        return;
    }
    lock_mutex(state).mark_read_through(room_id, event_id, own_user_id);
}

/// Catalog entries in catalog order enriched with live state, then live-only channels.
fn merge_channels(catalog: Vec<PublicChannel>, live: Vec<ChatRoom>) -> Vec<Room> {
    let mut live_by_id: HashMap<String, ChatRoom> = live
        .iter()
        .cloned()
        .map(|room| (room.room_id.clone(), room))
        .collect();
    let mut seen = HashSet::new();
    let mut rooms = Vec::with_capacity(catalog.len() + live.len());

    for channel in catalog {
        if !seen.insert(channel.matrix_room_id.clone()) {
            continue;
        }
        let live_room = live_by_id.remove(&channel.matrix_room_id);
        rooms.push(Room {
            id: channel.matrix_room_id,
            name: channel.name,
            avatar_url: live_room.as_ref().and_then(|room| room.avatar_url.clone()),
            unread_count: live_room.as_ref().map_or(0, |room| room.unread_count),
            kind: RoomKind::Channel,
            last_message: live_room.and_then(|room| room.last_message),
        });
    }

    for room in live {
        if seen.insert(room.room_id.clone()) {
            rooms.push(Room::from(room));
        }
    }
    rooms
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        directory::StaticChannelDirectory,
        error::ChatErrorKind,
        identity::Identity,
        store::ConversationStore,
        test_support::{
            BOB, FakeAdapter, Gate, ME, ROOM, live_event, network_error, numbered, sent,
        },
        types::{DirectMessage, EventOrigin, HistoryPage, IncomingEvent, ReadReceipt},
    };

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    const NOW: u64 = 1_700_000_000_000;

    type Repo = ChatRepository<FakeAdapter, ConversationStore, StaticChannelDirectory>;

    fn repo_with(adapter: FakeAdapter, catalog: Vec<PublicChannel>) -> Repo {
        let state = Arc::new(Mutex::new(ConversationStore::default()));
        ChatRepository::new(
            Arc::new(adapter),
            state,
            StaticChannelDirectory::new(catalog),
            SyncConfig::default(),
        )
        .with_clock(Arc::new(FixedClock(NOW)))
    }

    fn repo() -> Repo {
        repo_with(FakeAdapter::signed_in(), Vec::new())
    }

    fn channel_room(id: &str, unread: u32) -> Room {
        Room {
            id: id.into(),
            name: id.into(),
            avatar_url: None,
            unread_count: unread,
            kind: RoomKind::Channel,
            last_message: None,
        }
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|message| message.id.clone()).collect()
    }

    #[tokio::test]
    async fn send_confirms_optimistic_message() {
        let repo = repo();
        repo.adapter()
            .state()
            .send_results
            .push_back(Ok("evt-1".to_owned()));

        let event_id = repo
            .send_message(ROOM, "Tight lines")
            .await
            .expect("send should succeed");

        assert_eq!(event_id, "evt-1");
        let messages = repo.messages(ROOM);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "evt-1");
        assert_eq!(messages[0].status, MessageStatus::Sent);
        assert_eq!(messages[0].text.as_deref(), Some("Tight lines"));
        assert_eq!(messages[0].sender_id, ME);
    }

    #[tokio::test]
    async fn optimistic_message_is_visible_while_send_is_in_flight() {
        let repo = repo();
        let gate = Gate::new();
        {
            let mut adapter = repo.adapter().state();
            adapter.send_results.push_back(Ok("evt-1".to_owned()));
            adapter.send_gate = Some(gate.clone());
        }

        let observe = async {
            gate.entered().await;
            let messages = repo.messages(ROOM);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].id, format!("temp-{NOW}"));
            assert_eq!(messages[0].status, MessageStatus::Sending);
            gate.release();
        };
        let (result, ()) = tokio::join!(repo.send_message(ROOM, "Tight lines"), observe);

        assert_eq!(result.expect("send should succeed"), "evt-1");
        let messages = repo.messages(ROOM);
        assert_eq!(ids(&messages), vec!["evt-1"]);
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn failed_send_stays_visible_and_can_be_retried() {
        let repo = repo();
        repo.adapter()
            .state()
            .send_results
            .push_back(Err(network_error("offline")));

        let err = repo
            .send_message(ROOM, "hello")
            .await
            .expect_err("send should fail");
        assert_eq!(err.kind(), ChatErrorKind::MessageSendFailed);

        let messages = repo.messages(ROOM);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        let temp_id = messages[0].id.clone();
        assert_eq!(temp_id, format!("temp-{NOW}"));

        let retried = repo
            .retry_message(ROOM, &temp_id)
            .await
            .expect("retry should succeed");
        assert_eq!(retried.as_deref(), Some("$evt-2"));
        let messages = repo.messages(ROOM);
        assert_eq!(ids(&messages), vec!["$evt-2"]);
        assert_eq!(messages[0].status, MessageStatus::Sent);

        assert_eq!(
            repo.retry_message(ROOM, "$evt-2").await.expect("no-op retry"),
            None
        );
    }

    #[tokio::test]
    async fn failed_message_can_be_removed() {
        let repo = repo();
        repo.adapter()
            .state()
            .send_results
            .push_back(Err(network_error("offline")));
        let _ = repo.send_message(ROOM, "hello").await;
        let temp_id = repo.messages(ROOM)[0].id.clone();

        assert!(repo.remove_failed_message(ROOM, &temp_id));
        assert!(repo.messages(ROOM).is_empty());
        assert!(!repo.remove_failed_message(ROOM, &temp_id));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_side_effects() {
        let repo = repo();
        let err = repo
            .send_message(ROOM, "   ")
            .await
            .expect_err("blank text is invalid");
        assert_eq!(err.kind(), ChatErrorKind::InvalidMessage);

        let err = repo
            .send_media(ROOM, None, &[])
            .await
            .expect_err("nothing to send");
        assert_eq!(err.kind(), ChatErrorKind::InvalidMessage);

        assert!(repo.messages(ROOM).is_empty());
        assert!(repo.adapter().state().sent.is_empty());
    }

    #[tokio::test]
    async fn rapid_sends_get_distinct_temp_ids() {
        let repo = repo();
        {
            let mut state = repo.adapter().state();
            state.send_results.push_back(Err(network_error("offline")));
            state.send_results.push_back(Err(network_error("offline")));
        }
        let _ = repo.send_message(ROOM, "one").await;
        let _ = repo.send_message(ROOM, "two").await;

        let messages = repo.messages(ROOM);
        assert_eq!(messages.len(), 2);
        assert_ne!(messages[0].id, messages[1].id);
        assert!(messages.iter().all(Message::is_temporary));
    }

    #[tokio::test]
    async fn live_echo_racing_the_ack_leaves_one_message() {
        let repo = repo();
        repo.adapter().state().echo_before_ack = true;
        repo.subscribe_to_room(ROOM);

        let event_id = repo
            .send_message(ROOM, "Tight lines")
            .await
            .expect("send should succeed");

        let messages = repo.messages(ROOM);
        assert_eq!(ids(&messages), vec![event_id]);
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn media_upload_failure_creates_no_message() {
        let repo = repo();
        repo.adapter().state().upload_error = Some(network_error("upload"));

        let err = repo
            .send_media(ROOM, Some("look"), &[LocalMedia::new("/tmp/fish.jpg", "image/jpeg")])
            .await
            .expect_err("upload should fail");
        match err {
            ChatError::UploadFailed { file_name, .. } => assert_eq!(file_name, "fish.jpg"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(repo.messages(ROOM).is_empty());
    }

    #[tokio::test]
    async fn media_is_uploaded_then_sent_as_one_message() {
        let repo = repo();
        let files = [
            LocalMedia::new("/tmp/a.pdf", "application/pdf"),
            LocalMedia::new("/tmp/b.pdf", "application/pdf"),
        ];

        repo.send_media(ROOM, Some("docs"), &files)
            .await
            .expect("media send should succeed");

        let state = repo.adapter().state();
        assert_eq!(state.uploads, vec!["a.pdf", "b.pdf"]);
        assert_eq!(state.sent.len(), 1);
        assert_eq!(state.sent[0].1.as_deref(), Some("docs"));
        assert_eq!(state.sent[0].2.len(), 2);
        drop(state);

        let messages = repo.messages(ROOM);
        assert_eq!(messages[0].attachments.len(), 2);
    }

    #[tokio::test]
    async fn load_messages_replaces_timeline_and_keeps_pending() {
        let repo = repo();
        {
            let mut state = repo.adapter().state();
            state.send_results.push_back(Err(network_error("offline")));
            state.initial.insert(
                ROOM.to_owned(),
                HistoryPage {
                    messages: numbered(1, 3),
                    has_more: true,
                },
            );
        }
        let _ = repo.send_message(ROOM, "unsent").await;

        let count = repo.load_messages(ROOM).await.expect("load should succeed");
        assert_eq!(count, 3);
        let messages = repo.messages(ROOM);
        assert_eq!(&ids(&messages)[..3], ["m1", "m2", "m3"]);
        assert_eq!(messages[3].status, MessageStatus::Failed);
        assert!(repo.has_more(ROOM));
    }

    #[tokio::test]
    async fn failed_load_keeps_displayed_messages() {
        let repo = repo();
        repo.adapter().state().initial.insert(
            ROOM.to_owned(),
            HistoryPage {
                messages: numbered(1, 3),
                has_more: false,
            },
        );
        repo.load_messages(ROOM).await.expect("first load");

        repo.adapter().state().initial_error = Some(network_error("timeout"));
        let err = repo.load_messages(ROOM).await.expect_err("second load fails");
        assert_eq!(err.kind(), ChatErrorKind::NetworkError);
        assert_eq!(repo.messages(ROOM).len(), 3);

        repo.adapter().state().initial_error =
            Some(crate::error::AdapterError::room_not_found(ROOM));
        let err = repo.load_messages(ROOM).await.expect_err("room gone");
        assert_eq!(err.kind(), ChatErrorKind::RoomNotFound);
    }

    #[tokio::test]
    async fn load_more_pulls_network_pages_until_target() {
        let repo = repo();
        {
            let mut state = repo.adapter().state();
            state.initial.insert(
                ROOM.to_owned(),
                HistoryPage {
                    messages: numbered(21, 40),
                    has_more: true,
                },
            );
            state.history.push_back(Ok(HistoryPage {
                messages: numbered(11, 20),
                has_more: true,
            }));
            state.history.push_back(Ok(HistoryPage {
                messages: numbered(1, 10),
                has_more: true,
            }));
        }
        repo.load_messages(ROOM).await.expect("initial load");

        let outcome = repo
            .load_more_messages(ROOM)
            .await
            .expect("load more should succeed");
        assert_eq!(
            outcome,
            LoadMoreOutcome::Loaded {
                added: 20,
                has_more: true,
                source: PageSource::Network,
            }
        );
        let messages = repo.messages(ROOM);
        assert_eq!(ids(&messages), ids(&numbered(1, 40)));
        assert!(!repo.is_loading_history());
    }

    #[tokio::test]
    async fn load_more_prefers_adapter_memory() {
        let repo = repo();
        {
            let mut state = repo.adapter().state();
            state.memory.insert(ROOM.to_owned(), numbered(1, 60));
            state.initial.insert(
                ROOM.to_owned(),
                HistoryPage {
                    messages: numbered(31, 60),
                    has_more: false,
                },
            );
        }
        repo.load_messages(ROOM).await.expect("initial load");

        let outcome = repo.load_more_messages(ROOM).await.expect("load more");
        assert_eq!(
            outcome,
            LoadMoreOutcome::Loaded {
                added: 20,
                has_more: true,
                source: PageSource::Memory,
            }
        );
        assert!(repo.adapter().state().history_calls.is_empty());
        assert_eq!(repo.messages(ROOM).first().map(|m| m.id.clone()), Some("m11".to_owned()));
    }

    #[tokio::test]
    async fn total_pagination_failure_keeps_has_more() {
        let repo = repo();
        {
            let mut state = repo.adapter().state();
            state.initial.insert(
                ROOM.to_owned(),
                HistoryPage {
                    messages: numbered(11, 20),
                    has_more: true,
                },
            );
            state.history.push_back(Err(network_error("timeout")));
        }
        repo.load_messages(ROOM).await.expect("initial load");

        let err = repo
            .load_more_messages(ROOM)
            .await
            .expect_err("pagination fails");
        assert_eq!(err.kind(), ChatErrorKind::PaginationFailed);
        assert!(repo.has_more(ROOM));
        assert!(!repo.is_loading_history());
        assert_eq!(repo.messages(ROOM).len(), 10);
    }

    #[tokio::test]
    async fn load_more_is_dropped_while_another_is_in_flight() {
        let repo = repo();
        {
            let mut state = repo.lock();
            state.set_messages(ROOM, numbered(21, 25));
            state.set_has_more(ROOM, true);
        }
        let gate = Gate::new();
        {
            let mut adapter = repo.adapter().state();
            adapter.history.push_back(Ok(HistoryPage {
                messages: numbered(1, 20),
                has_more: true,
            }));
            adapter.history_gate = Some(gate.clone());
        }

        let overlapping = async {
            gate.entered().await;
            assert!(repo.is_loading_history());
            let outcome = repo.load_more_messages(ROOM).await.expect("no error");
            assert_eq!(outcome, LoadMoreOutcome::AlreadyLoading);
            gate.release();
        };
        let (first, ()) = tokio::join!(repo.load_more_messages(ROOM), overlapping);

        assert_eq!(
            first.expect("first load succeeds"),
            LoadMoreOutcome::Loaded {
                added: 20,
                has_more: true,
                source: PageSource::Network,
            }
        );
        assert!(!repo.is_loading_history());
        assert_eq!(repo.adapter().state().history_calls.len(), 1);
        assert_eq!(repo.messages(ROOM).len(), 25);
    }

    #[tokio::test]
    async fn live_event_during_pagination_is_appended_immediately() {
        let repo = repo();
        repo.subscribe_to_room(ROOM);
        {
            let mut state = repo.lock();
            state.set_messages(ROOM, numbered(21, 25));
            state.set_has_more(ROOM, true);
        }
        let gate = Gate::new();
        {
            let mut adapter = repo.adapter().state();
            adapter.history.push_back(Ok(HistoryPage {
                messages: numbered(2, 21),
                has_more: true,
            }));
            adapter.history_gate = Some(gate.clone());
        }

        let live = async {
            gate.entered().await;
            repo.adapter().push(live_event(ROOM, sent("m26", BOB, 26_000)));
            let messages = repo.messages(ROOM);
            assert_eq!(messages.len(), 6);
            assert_eq!(messages.last().map(|message| message.id.as_str()), Some("m26"));
            gate.release();
        };
        let (outcome, ()) = tokio::join!(repo.load_more_messages(ROOM), live);

        match outcome.expect("page merges") {
            LoadMoreOutcome::Loaded { added, .. } => assert_eq!(added, 19),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let expected: Vec<String> = (2..=26).map(|n| format!("m{n}")).collect();
        assert_eq!(ids(&repo.messages(ROOM)), expected);
    }

    #[tokio::test]
    async fn retention_cap_keeps_newest_messages_and_ends_paging_when_full() {
        let adapter = FakeAdapter::signed_in();
        adapter.state().memory.insert(ROOM.to_owned(), numbered(1, 5));
        let repo: Repo = ChatRepository::new(
            Arc::new(adapter),
            Arc::new(Mutex::new(ConversationStore::new(3))),
            StaticChannelDirectory::default(),
            SyncConfig::default(),
        )
        .with_clock(Arc::new(FixedClock(NOW)));
        {
            let mut state = repo.lock();
            state.set_messages(ROOM, numbered(4, 5));
            state.set_has_more(ROOM, true);
        }

        let outcome = repo.load_more_messages(ROOM).await.expect("memory page");
        assert_eq!(
            outcome,
            LoadMoreOutcome::Loaded {
                added: 1,
                has_more: true,
                source: PageSource::Memory,
            }
        );
        assert_eq!(ids(&repo.messages(ROOM)), vec!["m3", "m4", "m5"]);

        let outcome = repo.load_more_messages(ROOM).await.expect("memory page");
        assert_eq!(
            outcome,
            LoadMoreOutcome::Loaded {
                added: 0,
                has_more: false,
                source: PageSource::Memory,
            }
        );
        assert_eq!(ids(&repo.messages(ROOM)), vec!["m3", "m4", "m5"]);
        assert!(repo.adapter().state().history_calls.is_empty());

        repo.lock().add_message(ROOM, sent("m6", BOB, 6_000));
        repo.mark_as_read(ROOM).await.expect("marker sent");
        assert_eq!(
            repo.adapter().state().read_markers,
            vec![(ROOM.to_owned(), "m6".to_owned())]
        );
    }

    #[tokio::test]
    async fn mark_as_read_targets_the_newest_known_event() {
        let repo = repo();
        {
            let mut state = repo.lock();
            state.set_messages(ROOM, numbered(1, 2));
            let mut room = channel_room(ROOM, 2);
            room.last_message = Some(sent("$9", BOB, 9_000));
            state.upsert_room(room);
        }

        repo.mark_as_read(ROOM).await.expect("marker sent");
        assert_eq!(repo.total_unread_count(), 0);

        repo.lock().add_message(ROOM, sent("m10", BOB, 10_000));
        repo.mark_as_read(ROOM).await.expect("marker sent");

        assert_eq!(
            repo.adapter().state().read_markers,
            vec![
                (ROOM.to_owned(), "$9".to_owned()),
                (ROOM.to_owned(), "m10".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn room_subscription_filters_echoes_and_duplicates() {
        let repo = repo();
        repo.subscribe_to_room(ROOM);
        let adapter = repo.adapter();

        adapter.push(live_event(ROOM, sent("$1", BOB, NOW)));
        adapter.push(live_event(ROOM, sent("$1", BOB, NOW)));
        adapter.push(LiveUpdate::Event(IncomingEvent {
            room_id: ROOM.into(),
            event_id: None,
            sender_id: ME.into(),
            origin: EventOrigin::Live,
            local_status: Some(MessageStatus::Sending),
            timestamp_ms: NOW,
            message: Some(sent("temp-1", ME, NOW)),
        }));
        let mut paged = live_event(ROOM, sent("$0", BOB, NOW - 10));
        if let LiveUpdate::Event(event) = &mut paged {
            event.origin = EventOrigin::Pagination;
        }
        adapter.push(paged);
        adapter.push(live_event("!other:example.org", sent("$9", BOB, NOW)));

        assert_eq!(ids(&repo.messages(ROOM)), vec!["$1"]);
    }

    #[tokio::test]
    async fn all_rooms_subscription_counts_unread_and_notifies() {
        let repo = repo();
        let other = "!other:example.org";
        repo.lock().replace_room_partition(
            RoomType::Channel,
            vec![channel_room(ROOM, 0), channel_room(other, 0)],
        );
        repo.lock().set_active_room(Some(ROOM.to_owned()));

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        repo.subscribe_to_all_messages(Arc::new(move |notification| {
            sink.lock().expect("sink lock").push(notification);
        }));

        let adapter = repo.adapter();
        adapter.push(live_event(other, sent("$a", BOB, NOW)));
        adapter.push(live_event(other, sent("$b", ME, NOW)));
        adapter.push(live_event(other, sent("$stale", BOB, NOW - 600_000)));
        adapter.push(live_event(ROOM, sent("$c", BOB, NOW - 600_000)));

        assert_eq!(repo.total_unread_count(), 1);
        let other_room = repo.lock().room(other).expect("room exists");
        assert_eq!(other_room.unread_count, 1);
        assert_eq!(other_room.last_message.map(|m| m.id), Some("$b".to_owned()));
        assert_eq!(ids(&repo.messages(ROOM)), vec!["$c"]);

        let notified = notified.lock().expect("sink lock");
        assert_eq!(notified.len(), 2);
        assert_eq!(notified[0].room_id, other);
        assert_eq!(notified[0].sender_name, "bob");
        assert!(!notified[0].is_active_room);
        assert!(notified[1].is_active_room);
    }

    #[tokio::test]
    async fn unsubscribe_stops_updates() {
        let repo = repo();
        let token = repo.subscribe_to_room(ROOM);
        assert_eq!(repo.adapter().subscriber_count(), 1);
        assert!(repo.unsubscribe(token));

        repo.adapter().push(live_event(ROOM, sent("$1", BOB, NOW)));
        assert!(repo.messages(ROOM).is_empty());
    }

    #[tokio::test]
    async fn receipts_from_others_mark_own_messages_read() {
        let repo = repo();
        repo.subscribe_to_room(ROOM);
        repo.send_message(ROOM, "first").await.expect("send");

        repo.adapter().push(LiveUpdate::Receipt(ReadReceipt {
            room_id: ROOM.into(),
            event_id: "$evt-1".into(),
            user_id: BOB.into(),
        }));

        assert_eq!(repo.messages(ROOM)[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn sync_channels_merges_catalog_with_live_state() {
        let adapter = FakeAdapter::signed_in();
        adapter.state().public_rooms = vec![
            ChatRoom {
                room_id: "!general:example.org".into(),
                name: "general (live)".into(),
                topic: None,
                avatar_url: Some("mxc://example.org/g".into()),
                unread_count: 4,
                member_count: 12,
                last_message: None,
            },
            ChatRoom {
                room_id: "!side:example.org".into(),
                name: "side".into(),
                topic: None,
                avatar_url: None,
                unread_count: 1,
                member_count: 3,
                last_message: None,
            },
        ];
        let catalog = vec![
            PublicChannel {
                id: "general".into(),
                matrix_room_id: "!general:example.org".into(),
                name: "General".into(),
                topic: None,
            },
            PublicChannel {
                id: "tips".into(),
                matrix_room_id: "!tips:example.org".into(),
                name: "Tips".into(),
                topic: None,
            },
        ];
        let repo = repo_with(adapter, catalog);

        assert_eq!(repo.sync_channels().await.expect("sync"), 3);
        let rooms = repo.rooms();
        let general = rooms
            .iter()
            .find(|room| room.id == "!general:example.org")
            .expect("general synced");
        assert_eq!(general.name, "General");
        assert_eq!(general.unread_count, 4);
        assert!(rooms.iter().any(|room| room.id == "!tips:example.org" && room.unread_count == 0));
        assert!(rooms.iter().any(|room| room.id == "!side:example.org"));
        assert_eq!(repo.total_unread_count(), 5);
    }

    #[tokio::test]
    async fn sync_failure_keeps_previous_rooms() {
        let repo = repo();
        repo.lock()
            .replace_room_partition(RoomType::Channel, vec![channel_room(ROOM, 2)]);
        repo.adapter().state().public_rooms_error = Some(network_error("timeout"));

        let err = repo.sync_channels().await.expect_err("sync fails");
        assert_eq!(err.kind(), ChatErrorKind::NetworkError);
        assert_eq!(repo.rooms().len(), 1);
        assert_eq!(repo.total_unread_count(), 2);
    }

    #[tokio::test]
    async fn direct_sync_leaves_channels_alone() {
        let repo = repo();
        repo.lock()
            .replace_room_partition(RoomType::Channel, vec![channel_room(ROOM, 1)]);
        repo.adapter().state().direct = vec![DirectMessage {
            room_id: "!dm:example.org".into(),
            other_user_id: BOB.into(),
            other_display_name: Some("Bob".into()),
            other_avatar_url: None,
            unread_count: 2,
            last_message: None,
        }];

        assert_eq!(repo.sync_direct_messages().await.expect("sync"), 1);
        assert_eq!(repo.rooms().len(), 2);
        assert_eq!(repo.total_unread_count(), 3);
    }

    #[tokio::test]
    async fn mark_as_read_clears_unread_even_if_backend_fails() {
        let repo = repo();
        repo.lock()
            .replace_room_partition(RoomType::Channel, vec![channel_room(ROOM, 3)]);
        repo.lock().set_messages(ROOM, numbered(1, 2));
        repo.adapter().state().read_error = Some(network_error("timeout"));

        let err = repo.mark_as_read(ROOM).await.expect_err("marker fails");
        assert_eq!(err.kind(), ChatErrorKind::NetworkError);
        assert_eq!(repo.total_unread_count(), 0);

        repo.adapter().state().read_error = None;
        repo.mark_as_read(ROOM).await.expect("marker succeeds");
        assert_eq!(
            repo.adapter().state().read_markers,
            vec![(ROOM.to_owned(), "m2".to_owned())]
        );
    }

    #[tokio::test]
    async fn leave_removes_room_only_after_backend_confirms() {
        let repo = repo();
        repo.lock()
            .replace_room_partition(RoomType::Channel, vec![channel_room(ROOM, 2)]);
        repo.adapter().state().leave_error = Some(network_error("timeout"));

        assert!(repo.leave_room(ROOM).await.is_err());
        assert_eq!(repo.rooms().len(), 1);

        repo.adapter().state().leave_error = None;
        repo.delete_chat(ROOM).await.expect("delete succeeds");
        assert!(repo.rooms().is_empty());
        assert_eq!(repo.total_unread_count(), 0);
        assert_eq!(repo.adapter().state().left, vec![(ROOM.to_owned(), true)]);
    }

    #[tokio::test]
    async fn open_room_loads_and_marks_read() {
        let repo = repo();
        repo.lock()
            .replace_room_partition(RoomType::Channel, vec![channel_room(ROOM, 5)]);
        repo.adapter().state().initial.insert(
            ROOM.to_owned(),
            HistoryPage {
                messages: numbered(1, 2),
                has_more: false,
            },
        );

        assert_eq!(repo.open_room(ROOM).await.expect("open"), 2);
        assert_eq!(repo.lock().active_room_id().as_deref(), Some(ROOM));
        assert_eq!(repo.total_unread_count(), 0);
        assert_eq!(repo.adapter().state().read_markers.len(), 1);

        repo.close_room();
        assert_eq!(repo.lock().active_room_id(), None);
    }

    #[tokio::test]
    async fn join_channel_reports_unknown_keys() {
        let repo = repo();
        repo.adapter()
            .state()
            .aliases
            .insert("general".into(), "!general:example.org".into());

        assert_eq!(
            repo.join_channel("general").await.expect("joined"),
            "!general:example.org"
        );
        let err = repo.join_channel("nope").await.expect_err("unknown key");
        assert_eq!(err.kind(), ChatErrorKind::RoomNotFound);
    }

    #[tokio::test]
    async fn room_details_refresh_store() {
        let repo = repo();
        repo.adapter()
            .state()
            .room_details
            .insert(ROOM.to_owned(), channel_room(ROOM, 0));

        let room = repo.room_details(ROOM).await.expect("details");
        assert_eq!(room.id, ROOM);
        assert_eq!(repo.rooms().len(), 1);

        let err = repo
            .room_details("!missing:example.org")
            .await
            .expect_err("unknown room");
        assert_eq!(err.kind(), ChatErrorKind::RoomNotFound);
    }

    #[tokio::test]
    async fn messages_are_enriched_with_sender_identity() {
        let identities = InMemoryIdentityCache::default();
        identities.insert(Identity {
            user_id: BOB.into(),
            display_name: "Bob Angler".into(),
            avatar_url: None,
        });
        let repo = repo().with_identity_cache(Arc::new(identities));
        repo.lock().set_messages(ROOM, vec![sent("$1", BOB, 1), sent("$2", ME, 2)]);

        let enriched = repo.messages_with_senders(ROOM);
        assert_eq!(enriched[0].sender.display_name, "Bob Angler");
        assert!(!enriched[0].is_own);
        assert_eq!(enriched[1].sender.display_name, "me");
        assert!(enriched[1].is_own);
    }

    #[tokio::test]
    async fn notification_callback_runs_outside_store_lock() {
        let repo = Arc::new(repo());
        let calls = Arc::new(AtomicUsize::new(0));
        let state = repo.state();
        let counter = calls.clone();
        repo.subscribe_to_all_messages(Arc::new(move |_| {
            // re-entrant read would deadlock if the lock were still held
            let _ = state.lock().expect("state lock").total_unread_count();
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        repo.adapter().push(live_event(ROOM, sent("$1", BOB, NOW)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
