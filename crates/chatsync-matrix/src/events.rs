//! Matrix client-server wire shapes consumed and produced by the adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROOM_MESSAGE: &str = "m.room.message";
pub const STICKER: &str = "m.sticker";

/// Room event as returned by `/sync` and `/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawTimelineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Absent on local echoes that have not been acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub origin_server_ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub unsigned: Unsigned,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_because: Option<Value>,
}

impl RawTimelineEvent {
    pub fn is_redacted(&self) -> bool {
        self.redacted_because.is_some() || self.unsigned.redacted_because.is_some()
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Unsigned {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u64>,
    /// Set on events the signed-in device sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_because: Option<Value>,
}

/// `info` block of media message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// One media item: the top level of `m.image`/`m.video`/`m.audio`/`m.file` content,
/// or an entry of the multi-attachment list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaContent {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub info: MediaInfo,
}

/// `m.room.message` / `m.sticker` content fields the adapter reads.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    #[serde(default)]
    pub msgtype: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub info: Option<MediaInfo>,
    #[serde(rename = "dev.chatsync.attachments", default)]
    pub attachments: Vec<MediaContent>,
}

/// Backward `/messages` response: `chunk` is newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagesChunk {
    pub chunk: Vec<RawTimelineEvent>,
    /// Token for the next older page; `None` once the start of the room is reached.
    #[serde(default)]
    pub end: Option<String>,
}
