//! [`ChatAdapter`] implementation over a [`MatrixTransport`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use chatsync_core::{
    AdapterError, AdapterErrorCategory, Attachment, ChatAdapter, ChatRoom, DirectMessage,
    EventOrigin, EventSink, HistoryPage, IncomingEvent, LiveUpdate, LocalMedia, Membership, Message,
    MessageStatus, ReadReceipt, Room, SubscriptionRegistry, SubscriptionToken,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::MatrixAdapterConfig,
    events::{MessagesChunk, ROOM_MESSAGE},
    media::{MediaUrls, upload_local_media},
    rooms::{TranslatedRoom, translate_room},
    timeline::RoomTimeline,
    transport::{
        LocalEchoState, MatrixTransport, TimelineDirection, TimelineUpdate, TransportNotice,
    },
    translate::{incoming_event, message_content, message_from_event},
};

struct Inner<T> {
    transport: T,
    media: MediaUrls,
    registry: SubscriptionRegistry,
    timelines: Mutex<HashMap<String, RoomTimeline>>,
    timeline_cap: usize,
}

impl<T: MatrixTransport> Inner<T> {
    fn timelines(&self) -> MutexGuard<'_, HashMap<String, RoomTimeline>> {
        self.timelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_timeline<R>(&self, room_id: &str, f: impl FnOnce(&mut RoomTimeline) -> R) -> R {
        let mut timelines = self.timelines();
        let timeline = timelines
            .entry(room_id.to_owned())
            .or_insert_with(|| RoomTimeline::new(self.timeline_cap));
        f(timeline)
    }

    fn handle_notice(&self, notice: TransportNotice) {
        let update = match notice {
            TransportNotice::Timeline(update) => LiveUpdate::Event(self.timeline_event(update)),
            TransportNotice::Receipt {
                room_id,
                event_id,
                user_id,
            } => LiveUpdate::Receipt(ReadReceipt {
                room_id,
                event_id,
                user_id,
            }),
        };
        let room_id = update.room_id().to_owned();
        let delivered = self.registry.emit(update);
        trace!(room_id = %room_id, delivered, "transport notice dispatched");
    }

    fn timeline_event(&self, update: TimelineUpdate) -> IncomingEvent {
        let origin = match update.direction {
            TimelineDirection::Forward => EventOrigin::Live,
            TimelineDirection::Backward => EventOrigin::Pagination,
        };
        let local_status = update.local_echo.map(|state| match state {
            LocalEchoState::Sending => MessageStatus::Sending,
            LocalEchoState::NotSent => MessageStatus::Failed,
        });
        let event = incoming_event(&update.room_id, &update.event, origin, local_status);

        if origin == EventOrigin::Live
            && local_status.is_none()
            && let Some(message) = &event.message
        {
            let mut timelines = self.timelines();
            if let Some(timeline) = timelines.get_mut(&update.room_id)
                && timeline.is_primed()
            {
                timeline.push_live(message.clone());
            }
        }
        event
    }

    fn server_name(&self) -> Result<String, AdapterError> {
        let user_id = self.transport.user_id().ok_or_else(not_signed_in)?;
        user_id
            .split_once(':')
            .map(|(_, server)| server.to_owned())
            .ok_or_else(|| {
                AdapterError::new(
                    AdapterErrorCategory::Internal,
                    "invalid_user_id",
                    format!("user ID has no server part: {user_id}"),
                )
            })
    }
}

fn not_signed_in() -> AdapterError {
    AdapterError::new(
        AdapterErrorCategory::Auth,
        "not_signed_in",
        "no signed-in Matrix session",
    )
}

/// Messages of a backward chunk in chronological order.
fn chronological(chunk: &MessagesChunk) -> Vec<Message> {
    chunk.chunk.iter().rev().filter_map(message_from_event).collect()
}

/// Matrix adapter: translates transport events, keeps per-room timelines for virtual
/// pagination and fans live updates out to subscribers.
pub struct MatrixAdapter<T: MatrixTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: MatrixTransport> MatrixAdapter<T> {
    pub fn new(transport: T, config: &MatrixAdapterConfig) -> Result<Self, AdapterError> {
        let inner = Arc::new(Inner {
            transport,
            media: MediaUrls::new(&config.homeserver)?,
            registry: SubscriptionRegistry::new(),
            timelines: Mutex::new(HashMap::new()),
            timeline_cap: config.timeline_cap,
        });

        let weak: Weak<Inner<T>> = Arc::downgrade(&inner);
        inner.transport.set_listener(Arc::new(move |notice| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_notice(notice);
            }
        }));
        info!(homeserver = %config.homeserver, "matrix adapter ready");
        Ok(Self { inner })
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn media_urls(&self) -> &MediaUrls {
        &self.inner.media
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    async fn send_content(
        &self,
        room_id: &str,
        content: serde_json::Value,
    ) -> Result<String, AdapterError> {
        let txn_id = Uuid::new_v4().to_string();
        let event_id = self
            .inner
            .transport
            .send_event(room_id, &txn_id, ROOM_MESSAGE, content)
            .await
            .map_err(|err| {
                warn!(room_id = %room_id, txn_id = %txn_id, error = %err, "send failed");
                AdapterError::from(err)
            })?;
        debug!(room_id = %room_id, txn_id = %txn_id, event_id = %event_id, "event sent");
        Ok(event_id)
    }

    async fn translated_rooms(&self) -> Result<Vec<TranslatedRoom>, AdapterError> {
        let own_user_id = self.inner.transport.user_id().ok_or_else(not_signed_in)?;
        let snapshots = self
            .inner
            .transport
            .joined_rooms()
            .await
            .map_err(AdapterError::from)?;
        let directory = self
            .inner
            .transport
            .direct_directory()
            .await
            .map_err(AdapterError::from)?;

        Ok(snapshots
            .iter()
            .filter(|snapshot| !snapshot.is_departed())
            .map(|snapshot| translate_room(snapshot, &directory, &own_user_id, &self.inner.media))
            .collect())
    }

    async fn join_resolved(&self, room_id: String) -> Result<Option<String>, AdapterError> {
        let joined = self
            .inner
            .transport
            .join(&room_id)
            .await
            .map_err(AdapterError::from)?;
        info!(room_id = %joined, "joined room");
        Ok(Some(joined))
    }
}

#[async_trait]
impl<T: MatrixTransport> ChatAdapter for MatrixAdapter<T> {
    fn current_user_id(&self) -> Option<String> {
        self.inner.transport.user_id()
    }

    async fn send_message(&self, room_id: &str, text: &str) -> Result<String, AdapterError> {
        self.send_content(room_id, message_content(Some(text), &[]))
            .await
    }

    async fn send_message_with_attachments(
        &self,
        room_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String, AdapterError> {
        if attachments.is_empty() && text.is_none_or(|text| text.trim().is_empty()) {
            return Err(AdapterError::new(
                AdapterErrorCategory::Config,
                "empty_message",
                "message has neither text nor attachments",
            ));
        }
        self.send_content(room_id, message_content(text, attachments))
            .await
    }

    async fn upload_media(&self, media: &LocalMedia) -> Result<Attachment, AdapterError> {
        upload_local_media(&self.inner.transport, media).await
    }

    async fn fetch_initial_messages(
        &self,
        room_id: &str,
        limit: u16,
    ) -> Result<HistoryPage, AdapterError> {
        let chunk = self
            .inner
            .transport
            .messages(room_id, None, limit)
            .await
            .map_err(AdapterError::from)?;
        let messages = chronological(&chunk);
        let has_more = chunk.end.is_some();

        self.inner
            .with_timeline(room_id, |timeline| timeline.reset(messages.clone(), chunk.end));
        debug!(room_id = %room_id, count = messages.len(), has_more, "initial page loaded");
        Ok(HistoryPage { messages, has_more })
    }

    async fn load_history(
        &self,
        room_id: &str,
        oldest_id: Option<&str>,
        limit: u16,
    ) -> Result<HistoryPage, AdapterError> {
        let (primed, token) = self.inner.with_timeline(room_id, |timeline| {
            (timeline.is_primed(), timeline.back_token().map(ToOwned::to_owned))
        });
        if primed && token.is_none() {
            trace!(room_id = %room_id, "start of room already reached");
            return Ok(HistoryPage::default());
        }
        trace!(room_id = %room_id, oldest_id = ?oldest_id, token = ?token, "requesting older page");

        let chunk = self
            .inner
            .transport
            .messages(room_id, token.as_deref(), limit)
            .await
            .map_err(AdapterError::from)?;

        for event in &chunk.chunk {
            self.inner
                .handle_notice(TransportNotice::Timeline(TimelineUpdate {
                    room_id: room_id.to_owned(),
                    event: event.clone(),
                    direction: TimelineDirection::Backward,
                    local_echo: None,
                }));
        }

        let messages = chronological(&chunk);
        let has_more = chunk.end.is_some();
        let fresh = self
            .inner
            .with_timeline(room_id, |timeline| timeline.prepend_page(messages.clone(), chunk.end));
        debug!(
            room_id = %room_id,
            count = messages.len(),
            fresh = fresh.len(),
            has_more,
            "history page loaded"
        );
        Ok(HistoryPage { messages, has_more })
    }

    fn timeline_snapshot(&self, room_id: &str) -> Vec<Message> {
        self.inner
            .timelines()
            .get(room_id)
            .map(RoomTimeline::messages)
            .unwrap_or_default()
    }

    fn subscribe_to_room(&self, room_id: &str, sink: EventSink) -> SubscriptionToken {
        self.inner.registry.subscribe_room(room_id, sink)
    }

    fn subscribe_to_all_messages(&self, sink: EventSink) -> SubscriptionToken {
        self.inner.registry.subscribe_all(sink)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.registry.unsubscribe(token)
    }

    async fn fetch_public_rooms(&self) -> Result<Vec<ChatRoom>, AdapterError> {
        Ok(self
            .translated_rooms()
            .await?
            .into_iter()
            .filter_map(|room| match room {
                TranslatedRoom::Channel(channel) => Some(channel),
                TranslatedRoom::Direct(_) => None,
            })
            .collect())
    }

    async fn fetch_direct_messages(&self) -> Result<Vec<DirectMessage>, AdapterError> {
        Ok(self
            .translated_rooms()
            .await?
            .into_iter()
            .filter_map(|room| match room {
                TranslatedRoom::Direct(direct) => Some(direct),
                TranslatedRoom::Channel(_) => None,
            })
            .collect())
    }

    async fn get_room_details(&self, room_id: &str) -> Result<Option<Room>, AdapterError> {
        let own_user_id = self.inner.transport.user_id().ok_or_else(not_signed_in)?;
        let Some(snapshot) = self
            .inner
            .transport
            .room_snapshot(room_id)
            .await
            .map_err(AdapterError::from)?
        else {
            return Ok(None);
        };
        if snapshot.is_departed() {
            return Ok(None);
        }
        let directory = self
            .inner
            .transport
            .direct_directory()
            .await
            .map_err(AdapterError::from)?;
        Ok(Some(
            translate_room(&snapshot, &directory, &own_user_id, &self.inner.media).into(),
        ))
    }

    async fn leave_room(&self, room_id: &str, forget: bool) -> Result<(), AdapterError> {
        self.inner
            .transport
            .leave(room_id)
            .await
            .map_err(AdapterError::from)?;
        if forget {
            self.inner
                .transport
                .forget(room_id)
                .await
                .map_err(AdapterError::from)?;
        }
        self.inner.timelines().remove(room_id);
        info!(room_id = %room_id, forget, "left room");
        Ok(())
    }

    async fn mark_as_read(&self, room_id: &str, event_id: &str) -> Result<(), AdapterError> {
        self.inner
            .transport
            .send_read_marker(room_id, event_id)
            .await
            .map_err(AdapterError::from)?;
        trace!(room_id = %room_id, event_id = %event_id, "read marker sent");
        Ok(())
    }

    async fn join_or_create_room(
        &self,
        channel_key: &str,
    ) -> Result<Option<String>, AdapterError> {
        let key = channel_key.trim().trim_start_matches('#');
        if key.is_empty() {
            return Ok(None);
        }
        let own_server = self.inner.server_name()?;
        let (localpart, server) = match key.split_once(':') {
            Some((localpart, server)) => (localpart, server.to_owned()),
            None => (key, own_server.clone()),
        };
        let alias = format!("#{localpart}:{server}");

        if let Some(room_id) = self
            .inner
            .transport
            .resolve_alias(&alias)
            .await
            .map_err(AdapterError::from)?
        {
            return self.join_resolved(room_id).await;
        }
        if server != own_server {
            debug!(alias = %alias, "foreign alias does not resolve");
            return Ok(None);
        }

        match self.inner.transport.create_room(localpart, localpart).await {
            Ok(room_id) => {
                info!(alias = %alias, room_id = %room_id, "created room for channel");
                Ok(Some(room_id))
            }
            Err(err) if err.is_room_in_use() => {
                debug!(alias = %alias, "alias claimed concurrently; resolving again");
                match self
                    .inner
                    .transport
                    .resolve_alias(&alias)
                    .await
                    .map_err(AdapterError::from)?
                {
                    Some(room_id) => self.join_resolved(room_id).await,
                    None => Ok(None),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn joined_rooms(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .inner
            .transport
            .joined_rooms()
            .await
            .map_err(AdapterError::from)?
            .into_iter()
            .filter(|snapshot| snapshot.own_membership == Membership::Join)
            .map(|snapshot| snapshot.room_id)
            .collect())
    }
}
