//! Protocol adapter port.
//!
//! The orchestrator only talks to the chat backend through [`ChatAdapter`]. Implementations
//! translate protocol events into [`IncomingEvent`]s, keep an in-memory timeline per room for
//! virtual pagination, and push live updates into registered [`EventSink`]s.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::AdapterError,
    types::{Attachment, ChatRoom, DirectMessage, HistoryPage, LiveUpdate, LocalMedia, Message, Room},
};

/// Callback receiving live updates for a subscription.
pub type EventSink = Arc<dyn Fn(LiveUpdate) + Send + Sync + 'static>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

/// Capability set the synchronization core needs from a chat backend.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Backend handle of the signed-in user, if a session exists.
    fn current_user_id(&self) -> Option<String>;

    /// Send a text message; returns the backend event ID.
    async fn send_message(&self, room_id: &str, text: &str) -> Result<String, AdapterError>;

    /// Send already-uploaded attachments with an optional caption as one message.
    async fn send_message_with_attachments(
        &self,
        room_id: &str,
        text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String, AdapterError>;

    /// Upload a local file and describe it as an attachment.
    async fn upload_media(&self, media: &LocalMedia) -> Result<Attachment, AdapterError>;

    /// Most recent page of a room, oldest first.
    async fn fetch_initial_messages(
        &self,
        room_id: &str,
        limit: u16,
    ) -> Result<HistoryPage, AdapterError>;

    /// Next page of older history before `oldest_id` (or the adapter's own cursor).
    async fn load_history(
        &self,
        room_id: &str,
        oldest_id: Option<&str>,
        limit: u16,
    ) -> Result<HistoryPage, AdapterError>;

    /// Messages the adapter already holds in memory for a room, oldest first.
    fn timeline_snapshot(&self, room_id: &str) -> Vec<Message>;

    fn subscribe_to_room(&self, room_id: &str, sink: EventSink) -> SubscriptionToken;

    fn subscribe_to_all_messages(&self, sink: EventSink) -> SubscriptionToken;

    /// Drop a subscription; returns `false` for unknown tokens.
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;

    async fn fetch_public_rooms(&self) -> Result<Vec<ChatRoom>, AdapterError>;

    async fn fetch_direct_messages(&self) -> Result<Vec<DirectMessage>, AdapterError>;

    async fn get_room_details(&self, room_id: &str) -> Result<Option<Room>, AdapterError>;

    /// Leave a room, optionally forgetting it so it disappears from history.
    async fn leave_room(&self, room_id: &str, forget: bool) -> Result<(), AdapterError>;

    /// Move the read marker of the signed-in user to `event_id`.
    async fn mark_as_read(&self, room_id: &str, event_id: &str) -> Result<(), AdapterError>;

    /// Join the room published under a channel key, creating it when missing.
    ///
    /// Returns `None` when the key cannot be resolved to a room.
    async fn join_or_create_room(&self, channel_key: &str)
    -> Result<Option<String>, AdapterError>;

    async fn joined_rooms(&self) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }
}
