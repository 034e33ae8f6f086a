use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Prefix carried by client-generated message identifiers until the backend confirms them.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Build the temporary identifier used for an optimistic message.
pub fn temp_message_id(timestamp_ms: u64) -> String {
    format!("{TEMP_ID_PREFIX}{timestamp_ms}")
}

/// Whether `id` has the shape of a client-generated temporary identifier.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Delivery state of a message as seen by the local user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically rendered, not yet confirmed by the backend.
    Sending,
    /// Confirmed by the backend.
    Sent,
    /// The backend rejected the send or the transport failed.
    Failed,
    /// Another member acknowledged reading the message.
    Read,
}

/// Media attached to a message.
///
/// `url` is the stable remote reference returned by the media gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attachment {
    Image {
        url: String,
        size: u64,
        mime_type: String,
        width: Option<u32>,
        height: Option<u32>,
        file_name: Option<String>,
    },
    Video {
        url: String,
        size: u64,
        mime_type: String,
        width: Option<u32>,
        height: Option<u32>,
        duration_ms: Option<u64>,
        file_name: Option<String>,
    },
    Audio {
        url: String,
        size: u64,
        mime_type: String,
        duration_ms: Option<u64>,
        file_name: Option<String>,
    },
    File {
        url: String,
        size: u64,
        mime_type: String,
        file_name: String,
    },
}

/// Attachment variant without its payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

impl AttachmentKind {
    /// Pick the attachment variant for a MIME type (`image/*`, `video/*`, `audio/*`, otherwise file).
    pub fn from_mime_type(mime_type: &str) -> Self {
        let top_level = mime_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top_level.as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::File,
        }
    }
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Image { .. } => AttachmentKind::Image,
            Self::Video { .. } => AttachmentKind::Video,
            Self::Audio { .. } => AttachmentKind::Audio,
            Self::File { .. } => AttachmentKind::File,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Image { url, .. }
            | Self::Video { url, .. }
            | Self::Audio { url, .. }
            | Self::File { url, .. } => url,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Image { size, .. }
            | Self::Video { size, .. }
            | Self::Audio { size, .. }
            | Self::File { size, .. } => *size,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Self::Image { mime_type, .. }
            | Self::Video { mime_type, .. }
            | Self::Audio { mime_type, .. }
            | Self::File { mime_type, .. } => mime_type,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Image { file_name, .. }
            | Self::Video { file_name, .. }
            | Self::Audio { file_name, .. } => file_name.as_deref(),
            Self::File { file_name, .. } => Some(file_name),
        }
    }
}

/// A single chat message in a room timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Temporary `temp-<ts>` token before confirmation, backend event ID after.
    pub id: String,
    /// Backend-native user handle of the author.
    pub sender_id: String,
    /// Local delivery state.
    pub status: MessageStatus,
    /// Origin timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    /// Text body, or caption when attachments are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Build a plain text message.
    pub fn text(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        status: MessageStatus,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            status,
            timestamp_ms,
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }

    /// Whether the message still carries a client-generated identifier.
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// Short human-readable summary used for room previews and notifications.
    pub fn preview(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|text| !text.trim().is_empty()) {
            return text.to_owned();
        }
        match self.attachments.first().map(Attachment::kind) {
            Some(AttachmentKind::Image) => "[image]".to_owned(),
            Some(AttachmentKind::Video) => "[video]".to_owned(),
            Some(AttachmentKind::Audio) => "[audio]".to_owned(),
            Some(AttachmentKind::File) => "[file]".to_owned(),
            None => String::new(),
        }
    }
}

/// Room type used for partitioned room-list synchronization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Direct,
    Channel,
}

/// Room type with the data only meaningful for that type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoomKind {
    /// Two-party chat resolving to exactly one other identity.
    Direct { other_user_id: String },
    /// Multi-party channel.
    Channel,
}

impl RoomKind {
    pub fn room_type(&self) -> RoomType {
        match self {
            Self::Direct { .. } => RoomType::Direct,
            Self::Channel => RoomType::Channel,
        }
    }
}

/// Conversation container held by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub unread_count: u32,
    pub kind: RoomKind,
    pub last_message: Option<Message>,
}

impl Room {
    pub fn room_type(&self) -> RoomType {
        self.kind.room_type()
    }
}

/// Channel room as reported by the protocol adapter's live state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    pub room_id: String,
    pub name: String,
    pub topic: Option<String>,
    pub avatar_url: Option<String>,
    pub unread_count: u32,
    pub member_count: u32,
    pub last_message: Option<Message>,
}

impl From<ChatRoom> for Room {
    fn from(room: ChatRoom) -> Self {
        Self {
            id: room.room_id,
            name: room.name,
            avatar_url: room.avatar_url,
            unread_count: room.unread_count,
            kind: RoomKind::Channel,
            last_message: room.last_message,
        }
    }
}

/// Direct chat as reported by the protocol adapter's live state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectMessage {
    pub room_id: String,
    pub other_user_id: String,
    pub other_display_name: Option<String>,
    pub other_avatar_url: Option<String>,
    pub unread_count: u32,
    pub last_message: Option<Message>,
}

impl From<DirectMessage> for Room {
    fn from(dm: DirectMessage) -> Self {
        let name = dm
            .other_display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| dm.other_user_id.clone());
        Self {
            id: dm.room_id,
            name,
            avatar_url: dm.other_avatar_url,
            unread_count: dm.unread_count,
            kind: RoomKind::Direct {
                other_user_id: dm.other_user_id,
            },
            last_message: dm.last_message,
        }
    }
}

/// Structural channel catalog entry, independent of live membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicChannel {
    /// Catalog identifier.
    pub id: String,
    /// Backend room the catalog entry maps to.
    pub matrix_room_id: String,
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// One backward-history page returned by the protocol adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages in chronological order (oldest first).
    pub messages: Vec<Message>,
    /// Whether older history remains on the backend.
    pub has_more: bool,
}

/// How an incoming event reached the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Pushed by the backend after the initial load.
    Live,
    /// Part of a backward-pagination batch.
    Pagination,
}

/// Protocol event already translated by the adapter, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingEvent {
    pub room_id: String,
    /// Backend event ID, absent for local echoes not yet acknowledged.
    pub event_id: Option<String>,
    pub sender_id: String,
    pub origin: EventOrigin,
    /// Local send state when the event is one of our own pending echoes.
    pub local_status: Option<MessageStatus>,
    pub timestamp_ms: u64,
    /// Translated payload; `None` when the event is not a displayable message.
    pub message: Option<Message>,
}

/// Read receipt pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub room_id: String,
    pub event_id: String,
    pub user_id: String,
}

/// Push-side update delivered to subscription sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LiveUpdate {
    Event(IncomingEvent),
    Receipt(ReadReceipt),
}

impl LiveUpdate {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Event(event) => &event.room_id,
            Self::Receipt(receipt) => &receipt.room_id,
        }
    }
}

/// Local media file to be uploaded through the media gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub path: PathBuf,
    pub mime_type: String,
    /// Overrides the file name derived from `path`.
    pub file_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
}

impl LocalMedia {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            file_name: None,
            width: None,
            height: None,
            duration_ms: None,
        }
    }

    /// Name used for the upload and for file attachments.
    pub fn display_name(&self) -> String {
        self.file_name
            .clone()
            .or_else(|| {
                self.path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "upload".to_owned())
    }
}

/// Notification produced by the all-rooms subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageNotification {
    pub room_id: String,
    pub room_name: String,
    pub sender_name: String,
    pub message: Message,
    /// The room was being viewed when the message arrived.
    pub is_active_room: bool,
}
